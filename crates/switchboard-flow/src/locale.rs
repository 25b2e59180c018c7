use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use switchboard_core::config::LocaleConfig;
use switchboard_core::error::{Result, SwitchboardError};
use switchboard_core::types::LocaleTag;

use crate::graph::NodeId;

/// Everything locale-specific a session needs: prompt keys, speakable
/// phrases, the dialog prompt, and where the locale's dialog sub-graph starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocaleVariant {
    pub tag: LocaleTag,
    pub dialog_prompt: String,
    pub assets: HashMap<String, String>,
    pub phrases: HashMap<String, String>,
    pub dialog_entry: Option<NodeId>,
}

impl LocaleVariant {
    pub fn new(tag: LocaleTag, dialog_prompt: impl Into<String>) -> Self {
        Self {
            tag,
            dialog_prompt: dialog_prompt.into(),
            assets: HashMap::new(),
            phrases: HashMap::new(),
            dialog_entry: None,
        }
    }

    pub fn from_config(tag: LocaleTag, config: &LocaleConfig) -> Self {
        Self {
            tag,
            dialog_prompt: config.dialog_prompt.clone(),
            assets: config.assets.clone(),
            phrases: config.phrases.clone(),
            dialog_entry: None,
        }
    }

    pub fn asset(&self, name: &str) -> Option<&str> {
        self.assets.get(name).map(String::as_str)
    }

    pub fn phrase(&self, name: &str) -> Option<&str> {
        self.phrases.get(name).map(String::as_str)
    }
}

/// Maps a requested locale to its variant. Consulted once per session.
#[derive(Debug, Clone)]
pub struct LocaleSelector {
    variants: HashMap<LocaleTag, Arc<LocaleVariant>>,
    default: LocaleTag,
}

impl LocaleSelector {
    /// Build from the `[locales]` config table.
    pub fn from_config(
        locales: &HashMap<String, LocaleConfig>,
        default: impl Into<String>,
    ) -> Result<Self> {
        let variants = locales
            .iter()
            .map(|(tag, cfg)| {
                let tag = LocaleTag::new(tag.clone());
                let variant = LocaleVariant::from_config(tag.clone(), cfg);
                (tag, variant)
            })
            .collect();
        Self::new(variants, LocaleTag::new(default))
    }

    pub fn new(variants: HashMap<LocaleTag, LocaleVariant>, default: LocaleTag) -> Result<Self> {
        if !variants.contains_key(&default) {
            return Err(SwitchboardError::Config(format!(
                "default locale {} has no variant",
                default
            )));
        }
        Ok(Self {
            variants: variants
                .into_iter()
                .map(|(tag, v)| (tag, Arc::new(v)))
                .collect(),
            default,
        })
    }

    /// Point a locale at the entry node of its dialog sub-graph.
    pub fn bind_entry(&mut self, tag: &LocaleTag, entry: NodeId) -> Result<()> {
        let variant = self
            .variants
            .get_mut(tag)
            .ok_or_else(|| SwitchboardError::Config(format!("unknown locale {}", tag)))?;
        Arc::make_mut(variant).dialog_entry = Some(entry);
        Ok(())
    }

    pub fn default_tag(&self) -> &LocaleTag {
        &self.default
    }

    /// Locale tags in a stable order.
    pub fn tags(&self) -> Vec<LocaleTag> {
        let mut tags: Vec<LocaleTag> = self.variants.keys().cloned().collect();
        tags.sort_by(|a, b| a.0.cmp(&b.0));
        tags
    }

    pub fn variants(&self) -> impl Iterator<Item = &Arc<LocaleVariant>> {
        self.variants.values()
    }

    pub fn get(&self, tag: &LocaleTag) -> Option<&Arc<LocaleVariant>> {
        self.variants.get(tag)
    }

    /// Pick the variant for a requested locale.
    ///
    /// Tries an exact match, then a case-insensitive match, then the first
    /// variant sharing the language subtag, then the default locale.
    pub fn select(&self, requested: Option<&LocaleTag>) -> Arc<LocaleVariant> {
        if let Some(req) = requested {
            if let Some(v) = self.variants.get(req) {
                return v.clone();
            }
            let wanted = req.as_str().to_ascii_lowercase();
            if let Some(v) = self
                .variants
                .values()
                .find(|v| v.tag.as_str().to_ascii_lowercase() == wanted)
            {
                return v.clone();
            }
            let lang = language_subtag(&wanted);
            let mut same_lang: Vec<&Arc<LocaleVariant>> = self
                .variants
                .values()
                .filter(|v| language_subtag(&v.tag.as_str().to_ascii_lowercase()) == lang)
                .collect();
            same_lang.sort_by(|a, b| a.tag.0.cmp(&b.tag.0));
            if let Some(v) = same_lang.first() {
                return (*v).clone();
            }
            debug!(requested = %req, default = %self.default, "Unknown locale, using default");
        }
        self.variants[&self.default].clone()
    }
}

fn language_subtag(tag: &str) -> String {
    tag.split(|c: char| c == '-' || c == '_')
        .next()
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector() -> LocaleSelector {
        let mut variants = HashMap::new();
        let mut en = LocaleVariant::new(LocaleTag::from("en-US"), "How can we help?");
        en.assets.insert("goodbye".into(), "goodbye-en-US.wav".into());
        let mut es = LocaleVariant::new(LocaleTag::from("es-US"), "¿En qué puedo ayudarle?");
        es.assets.insert("goodbye".into(), "goodbye-es-US.wav".into());
        variants.insert(en.tag.clone(), en);
        variants.insert(es.tag.clone(), es);
        LocaleSelector::new(variants, LocaleTag::from("en-US")).unwrap()
    }

    #[test]
    fn exact_and_case_insensitive_match() {
        let s = selector();
        assert_eq!(s.select(Some(&LocaleTag::from("es-US"))).tag.as_str(), "es-US");
        assert_eq!(s.select(Some(&LocaleTag::from("ES-us"))).tag.as_str(), "es-US");
    }

    #[test]
    fn language_fallback() {
        let s = selector();
        assert_eq!(s.select(Some(&LocaleTag::from("es-MX"))).tag.as_str(), "es-US");
        assert_eq!(s.select(Some(&LocaleTag::from("es"))).tag.as_str(), "es-US");
    }

    #[test]
    fn unknown_and_missing_use_default() {
        let s = selector();
        assert_eq!(s.select(Some(&LocaleTag::from("fr-CA"))).tag.as_str(), "en-US");
        assert_eq!(s.select(None).tag.as_str(), "en-US");
    }

    #[test]
    fn tables_are_per_locale() {
        let s = selector();
        let es = s.select(Some(&LocaleTag::from("es-US")));
        assert_eq!(es.asset("goodbye"), Some("goodbye-es-US.wav"));
        let en = s.select(None);
        assert_eq!(en.asset("goodbye"), Some("goodbye-en-US.wav"));
    }

    #[test]
    fn bind_entry_sets_sub_graph() {
        let mut s = selector();
        s.bind_entry(&LocaleTag::from("es-US"), NodeId(5)).unwrap();
        assert_eq!(s.get(&LocaleTag::from("es-US")).unwrap().dialog_entry, Some(NodeId(5)));
        assert!(s.bind_entry(&LocaleTag::from("de-DE"), NodeId(1)).is_err());
    }

    #[test]
    fn default_must_exist() {
        assert!(LocaleSelector::new(HashMap::new(), LocaleTag::from("en-US")).is_err());
    }

    #[test]
    fn tags_sorted() {
        let tags = selector().tags();
        assert_eq!(tags, vec![LocaleTag::from("en-US"), LocaleTag::from("es-US")]);
    }
}
