use crate::model::ModelClass;

/// Capabilities of one externally visible model id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub id: String,
    /// `modelName` sent upstream.
    pub upstream: String,
    pub class: ModelClass,
    pub search: bool,
    pub image_generation: bool,
    /// Only the final caller turn is forwarded and it must be authored by the caller.
    pub requires_user_last: bool,
    /// Streaming output embeds generated images, which needs an image host.
    pub stream_needs_image_host: bool,
    pub deepsearch_preset: Option<String>,
    pub reasoning: bool,
}

impl ModelSpec {
    fn plain(id: &str, upstream: &str, class: ModelClass) -> Self {
        Self {
            id: id.to_string(),
            upstream: upstream.to_string(),
            class,
            search: false,
            image_generation: false,
            requires_user_last: false,
            stream_needs_image_host: false,
            deepsearch_preset: None,
            reasoning: false,
        }
    }

    fn with_search(mut self) -> Self {
        self.search = true;
        self
    }

    fn with_image_generation(mut self) -> Self {
        self.image_generation = true;
        self.requires_user_last = true;
        self.stream_needs_image_host = true;
        self
    }

    fn with_deepsearch(mut self, preset: &str, requires_user_last: bool) -> Self {
        self.deepsearch_preset = Some(preset.to_string());
        self.requires_user_last = requires_user_last;
        self
    }

    fn with_reasoning(mut self) -> Self {
        self.reasoning = true;
        self
    }
}

/// Model ids the gateway accepts and how they collapse into quota classes.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: Vec<ModelSpec>,
    /// Classes kept whole even though they share a prefix with another class.
    distinct: Vec<ModelClass>,
}

impl ModelCatalog {
    pub fn new(models: Vec<ModelSpec>, distinct: Vec<ModelClass>) -> Self {
        Self { models, distinct }
    }

    pub fn get(&self, id: &str) -> Option<&ModelSpec> {
        self.models.iter().find(|spec| spec.id == id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.models.iter().map(|spec| spec.id.as_str())
    }

    /// Maps a model id onto its quota class.
    ///
    /// Distinguished classes match exactly; any other id keeps its first two
    /// hyphen-delimited segments.
    pub fn normalize(&self, model_id: &str) -> Option<ModelClass> {
        if let Some(class) = self
            .distinct
            .iter()
            .copied()
            .find(|class| class.as_str() == model_id)
        {
            return Some(class);
        }
        let mut segments = model_id.splitn(3, '-');
        let head = match (segments.next(), segments.next()) {
            (Some(first), Some(second)) => format!("{first}-{second}"),
            _ => model_id.to_string(),
        };
        ModelClass::parse(&head)
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        let models = vec![
            ModelSpec::plain("grok-3", "grok-3", ModelClass::Grok3),
            ModelSpec::plain("grok-3-search", "grok-3", ModelClass::Grok3).with_search(),
            ModelSpec::plain("grok-3-imageGen", "grok-3", ModelClass::Grok3)
                .with_image_generation(),
            ModelSpec::plain("grok-3-deepsearch", "grok-3", ModelClass::Grok3DeepSearch)
                .with_deepsearch("default", true),
            ModelSpec::plain("grok-3-deepersearch", "grok-3", ModelClass::Grok3DeeperSearch)
                .with_deepsearch("deeper", false),
            ModelSpec::plain("grok-3-reasoning", "grok-3", ModelClass::Grok3Reasoning)
                .with_reasoning(),
            ModelSpec::plain("grok-4", "grok-4", ModelClass::Grok4),
            ModelSpec::plain("grok-4-search", "grok-4", ModelClass::Grok4).with_search(),
            ModelSpec::plain("grok-4-imageGen", "grok-4", ModelClass::Grok4)
                .with_image_generation(),
            ModelSpec::plain("grok-4-heavy", "grok-4-heavy", ModelClass::Grok4Heavy),
        ];
        let distinct = vec![
            ModelClass::Grok3DeepSearch,
            ModelClass::Grok3DeeperSearch,
            ModelClass::Grok3Reasoning,
            ModelClass::Grok4Heavy,
        ];
        Self::new(models, distinct)
    }
}
