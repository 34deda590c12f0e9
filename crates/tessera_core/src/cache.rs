//! Keyed texture registry owned by the application or renderer

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;

use crate::base_texture::{BaseTexture, BaseTextureOptions};
use crate::error::{Result, TextureError};
use crate::resource::TextureSource;
use crate::signal::ListenerId;
use crate::texture::Texture;
use crate::ticker::Ticker;

#[derive(Default)]
struct Inner {
    base_textures: RefCell<FxHashMap<String, BaseTexture>>,
    textures: RefCell<FxHashMap<String, Texture>>,
}

/// Lookup of textures and base textures by string key
///
/// A base texture can be registered under several keys. Destroying it removes
/// every key that points at it.
#[derive(Clone)]
pub struct TextureCache {
    inner: Rc<Inner>,
    listener: ListenerId,
}

impl Default for TextureCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TextureCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextureCache")
            .field("base_textures", &self.inner.base_textures.borrow().len())
            .field("textures", &self.inner.textures.borrow().len())
            .finish()
    }
}

impl TextureCache {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(Inner::default()),
            listener: ListenerId::unique(),
        }
    }

    fn watch(&self, base: &BaseTexture) {
        if base.on_destroy().is_connected(self.listener) {
            return;
        }
        let weak: Weak<Inner> = Rc::downgrade(&self.inner);
        base.on_destroy().connect_as(self.listener, move |uid| {
            if let Some(inner) = weak.upgrade() {
                inner
                    .base_textures
                    .borrow_mut()
                    .retain(|_, base| base.uid() != *uid);
                inner
                    .textures
                    .borrow_mut()
                    .retain(|_, texture| texture.base_texture().uid() != *uid);
            }
        });
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Base textures
    // ─────────────────────────────────────────────────────────────────────────

    /// Register `base` under `key`, replacing any previous entry
    pub fn put_base(&self, key: &str, base: &BaseTexture) {
        let previous = self
            .inner
            .base_textures
            .borrow_mut()
            .insert(key.to_string(), base.clone());
        if let Some(previous) = previous.filter(|p| p != base) {
            tracing::warn!("BaseTexture added to the cache with an id [{}] that already had an entry", key);
            previous.remove_cache_id(key);
        }
        base.add_cache_id(key);
        self.watch(base);
    }

    pub fn get_base(&self, key: &str) -> Option<BaseTexture> {
        self.inner.base_textures.borrow().get(key).cloned()
    }

    pub fn remove_base(&self, key: &str) -> Option<BaseTexture> {
        let removed = self.inner.base_textures.borrow_mut().remove(key);
        if let Some(base) = &removed {
            base.remove_cache_id(key);
        }
        removed
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Textures
    // ─────────────────────────────────────────────────────────────────────────

    pub fn put(&self, key: &str, texture: &Texture) {
        let previous = self
            .inner
            .textures
            .borrow_mut()
            .insert(key.to_string(), texture.clone());
        if previous.is_some_and(|p| p != *texture) {
            tracing::warn!("Texture added to the cache with an id [{}] that already had an entry", key);
        }
        self.watch(texture.base_texture());
    }

    pub fn get(&self, key: &str) -> Option<Texture> {
        self.inner.textures.borrow().get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<Texture> {
        self.inner.textures.borrow_mut().remove(key)
    }

    /// Look up `key`, failing instead of creating anything
    pub fn get_strict(&self, key: &str) -> Result<Texture> {
        self.get(key)
            .ok_or_else(|| TextureError::NotFound(key.to_string()))
    }

    /// Texture for an image path, loading and caching it on first use
    ///
    /// With `strict`, a missing entry is an error; use this to enforce that
    /// assets were preloaded.
    pub fn from_path(
        &self,
        path: &str,
        options: BaseTextureOptions,
        strict: bool,
        ticker: &Ticker,
    ) -> Result<Texture> {
        if let Some(texture) = self.get(path) {
            return Ok(texture);
        }
        if strict {
            return Err(TextureError::NotFound(path.to_string()));
        }

        let base = BaseTexture::from_source(TextureSource::Path(path.into()), options, ticker)?;
        let texture = Texture::from_base(base.clone());
        self.put_base(path, &base);
        self.put(path, &texture);
        Ok(texture)
    }

    /// Texture for a source without a natural key; cached under a generated id
    pub fn from_source(
        &self,
        source: TextureSource,
        options: BaseTextureOptions,
        ticker: &Ticker,
    ) -> Result<(String, Texture)> {
        let base = BaseTexture::from_source(source, options, ticker)?;
        let key = format!("tessera_id_{}", base.uid());
        let texture = Texture::from_base(base.clone());
        self.put_base(&key, &base);
        self.put(&key, &texture);
        Ok((key, texture))
    }

    pub fn len(&self) -> usize {
        self.inner.textures.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.textures.borrow().is_empty()
    }

    /// Drop every entry without destroying anything
    pub fn clear(&self) {
        for (key, base) in self.inner.base_textures.borrow_mut().drain() {
            base.remove_cache_id(&key);
        }
        self.inner.textures.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texture(w: u32, h: u32) -> Texture {
        let base =
            BaseTexture::from_buffer(vec![0; (w * h * 4) as usize], w, h, Default::default())
                .unwrap();
        Texture::from_base(base)
    }

    #[test]
    fn put_get_remove() {
        let cache = TextureCache::new();
        let tex = texture(2, 2);
        cache.put("a", &tex);
        assert_eq!(cache.get("a"), Some(tex.clone()));
        assert_eq!(cache.remove("a"), Some(tex));
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn strict_lookup_fails_for_missing_keys() {
        let cache = TextureCache::new();
        assert_eq!(
            cache.get_strict("missing.png"),
            Err(TextureError::NotFound("missing.png".into()))
        );
        let err = cache
            .from_path("missing.png", Default::default(), true, &Ticker::new())
            .unwrap_err();
        assert_eq!(err, TextureError::NotFound("missing.png".into()));
        assert!(cache.is_empty());
    }

    #[test]
    fn destroy_removes_every_alias() {
        let cache = TextureCache::new();
        let tex = texture(2, 2);
        let base = tex.base_texture().clone();
        cache.put_base("one", &base);
        cache.put_base("two", &base);
        cache.put("tex", &tex);
        assert_eq!(base.cache_ids(), vec!["one".to_string(), "two".to_string()]);

        base.destroy();
        assert!(cache.get_base("one").is_none());
        assert!(cache.get_base("two").is_none());
        assert!(cache.get("tex").is_none());
        assert!(base.cache_ids().is_empty());
    }

    #[test]
    fn caches_are_independent() {
        let a = TextureCache::new();
        let b = TextureCache::new();
        let tex = texture(1, 1);
        a.put("x", &tex);
        assert!(b.get("x").is_none());
    }

    #[test]
    fn generated_keys_for_sources() {
        let cache = TextureCache::new();
        let (key, tex) = cache
            .from_source(
                TextureSource::Pixels {
                    data: vec![0; 4],
                    width: 1,
                    height: 1,
                },
                Default::default(),
                &Ticker::new(),
            )
            .unwrap();
        assert!(key.starts_with("tessera_id_"));
        assert_eq!(cache.get(&key), Some(tex));
    }
}
