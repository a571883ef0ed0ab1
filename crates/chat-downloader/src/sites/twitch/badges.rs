//! Badge catalogs, cached per session.
//!
//! The global catalog is fetched once; channel catalogs once per room id.
//! A failed fetch is logged and cached as empty so the chat keeps flowing
//! with unresolved badges.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::chat::event::{Badge, Image};
use crate::chat::session::Http;

#[derive(Debug, Clone, Deserialize)]
struct BadgeVersion {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    image_url_1x: Option<String>,
    #[serde(default)]
    image_url_2x: Option<String>,
    #[serde(default)]
    image_url_4x: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct BadgeSet {
    #[serde(default)]
    versions: FxHashMap<String, BadgeVersion>,
}

/// Badge set name → version → metadata.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BadgeCatalog {
    #[serde(default)]
    badge_sets: FxHashMap<String, BadgeSet>,
}

impl BadgeCatalog {
    fn lookup(&self, name: &str, version: &str) -> Option<&BadgeVersion> {
        self.badge_sets.get(name)?.versions.get(version)
    }
}

fn apply_version(badge: &mut Badge, version: &BadgeVersion) {
    if !version.title.is_empty() {
        badge.title = version.title.clone();
    }
    badge.description = version.description.clone().filter(|d| !d.is_empty());
    badge.icons = [
        (&version.image_url_1x, 18),
        (&version.image_url_2x, 36),
        (&version.image_url_4x, 72),
    ]
    .into_iter()
    .filter_map(|(url, size)| Some(Image::new(url.as_ref()?.clone(), Some(size), Some(size))))
    .collect();
}

pub struct BadgeCache {
    http: Http,
    base_url: String,
    global: Mutex<Option<Arc<BadgeCatalog>>>,
    channels: Mutex<FxHashMap<String, Arc<BadgeCatalog>>>,
}

impl BadgeCache {
    pub fn new(http: Http, base_url: String) -> Self {
        Self {
            http,
            base_url,
            global: Mutex::new(None),
            channels: Mutex::new(FxHashMap::default()),
        }
    }

    async fn fetch(&self, url: &str) -> Arc<BadgeCatalog> {
        match self.http.get_json::<BadgeCatalog>(url).await {
            Ok(catalog) => {
                debug!(url, sets = catalog.badge_sets.len(), "Fetched badge catalog");
                Arc::new(catalog)
            }
            Err(e) => {
                warn!(url, error = %e, "Failed to fetch badge catalog");
                Arc::new(BadgeCatalog::default())
            }
        }
    }

    async fn global(&self) -> Arc<BadgeCatalog> {
        let cached = self.global.lock().clone();
        if let Some(catalog) = cached {
            return catalog;
        }
        let url = format!("{}/v1/badges/global/display", self.base_url);
        let catalog = self.fetch(&url).await;
        self.global.lock().get_or_insert(catalog).clone()
    }

    async fn channel(&self, room_id: &str) -> Arc<BadgeCatalog> {
        let cached = self.channels.lock().get(room_id).cloned();
        if let Some(catalog) = cached {
            return catalog;
        }
        let url = format!("{}/v1/badges/channels/{room_id}/display", self.base_url);
        let catalog = self.fetch(&url).await;
        self.channels
            .lock()
            .entry(room_id.to_string())
            .or_insert(catalog)
            .clone()
    }

    /// Fill in titles, descriptions and icons. Channel badges take
    /// precedence over global ones.
    pub async fn resolve(&self, badges: &mut [Badge], room_id: Option<&str>) {
        if badges.is_empty() {
            return;
        }
        let global = self.global().await;
        let channel = match room_id {
            Some(id) => Some(self.channel(id).await),
            None => None,
        };
        for badge in badges {
            let (Some(name), Some(version)) = (badge.name.clone(), badge.version.clone()) else {
                continue;
            };
            let found = channel
                .as_ref()
                .and_then(|c| c.lookup(&name, &version))
                .or_else(|| global.lookup(&name, &version));
            if let Some(found) = found {
                apply_version(badge, found);
            }
        }
    }

    pub fn clear(&self) {
        self.global.lock().take();
        self.channels.lock().clear();
    }
}
