/// Application name used for directory layout.
pub const APP_NAME: &str = "conveyor";

/// Project configuration file looked up in the project directory.
pub const CONFIG_FILENAME: &str = "conveyor.yaml";

/// Seed used as the predecessor of the first stage of an image.
pub const SIGNATURE_SEED: &str = "conveyor:seed:v1";

/// Bumped whenever the signature input layout changes.
pub const SIGNATURE_VERSION: u32 = 1;

/// Label keys attached to published images.
pub const LABEL_IMAGE: &str = "conveyor.image";
pub const LABEL_TAG_STRATEGY: &str = "conveyor.tag-strategy";
pub const LABEL_TAG_VALUE: &str = "conveyor.tag-value";
pub const LABEL_STAGES_SIGNATURE: &str = "conveyor.stages-signature";
pub const LABEL_STAGE: &str = "conveyor.stage";

/// Tag used when no tagging strategy is requested.
pub const DEFAULT_TAG: &str = "latest";

/// Label keys used by registry-backed stages storage.
pub const LABEL_LAYER: &str = "conveyor.layer";
pub const LABEL_CREATED_AT: &str = "conveyor.created-at";
pub const LABEL_SIZE: &str = "conveyor.size";

/// Prefix selecting the directory-backed registry.
pub const DIR_REGISTRY_PREFIX: &str = "dir:";
