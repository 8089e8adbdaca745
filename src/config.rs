//! Aggregate configuration.
//!
//! Every component config has public fields and a `Default` carrying the
//! production constants; override what you need with struct-update syntax:
//!
//! ```
//! use std::time::Duration;
//! use muse_fx::config::Config;
//! use muse_fx::connection::ConnectionConfig;
//!
//! let config = Config {
//!     connection: ConnectionConfig {
//!         name_prefix: "Muse-AB".into(),
//!         advertisement_timeout: Duration::from_secs(10),
//!         ..ConnectionConfig::default()
//!     },
//!     ..Config::default()
//! };
//! assert_eq!(config.connection.connect_attempts, 3);
//! ```

use crate::connection::ConnectionConfig;
use crate::effects::EffectConfig;
use crate::mapper::MapperConfig;
use crate::ppg::PpgConfig;
use crate::service::ServiceConfig;

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub ppg: PpgConfig,
    pub mapper: MapperConfig,
    pub effects: EffectConfig,
    pub service: ServiceConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ppg::WornStrategy;
    use crate::types::Band;

    #[test]
    fn defaults_match_production_constants() {
        let c = Config::default();
        assert_eq!(c.connection.name_prefix, "Muse");
        assert_eq!(c.connection.backoff.max_attempts, 10);
        assert_eq!(c.ppg.worn_hysteresis, 3);
        assert!(matches!(c.ppg.worn_strategy, WornStrategy::Perfusion { threshold } if threshold == 43_000.0));
        assert_eq!(c.mapper.mappings[0].band, Band::Alpha);
        assert_eq!(c.effects.min_interval.as_millis(), 50);
        assert_eq!(c.service.tick_interval.as_millis(), 100);
    }
}
