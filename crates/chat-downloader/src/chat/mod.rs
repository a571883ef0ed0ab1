//! Site-independent chat machinery: the canonical event model, field
//! remapping, filtering, retries, deadlines and the dispatcher.

pub mod deadline;
pub mod event;
pub mod filter;
pub mod handle;
pub mod params;
pub mod poll;
pub mod registry;
pub mod remap;
pub mod retry;
pub mod session;
pub mod site;
pub mod time;

pub use event::{Author, Badge, ChatEvent, Image, Money};
pub use handle::{Chat, ChatInfo, ChatStream};
pub use params::{ChatParams, ChatType, ResolvedParams, SiteDefaults};
pub use registry::{ChatDownloader, site_for_url, supported_sites};
pub use retry::RetryTimeout;
pub use session::SessionConfig;
pub use site::ChatSite;
