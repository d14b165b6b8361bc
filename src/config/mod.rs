mod settings;

pub use settings::{
    CacheConfig, DeliveryConfig, PushConfig, RetryConfig, ServerConfig, Settings, SmtpConfig,
    StoreConfig,
};
