//! Inline cache configuration

use crate::error::{IcError, IcResult};
use serde::{Deserialize, Serialize};

/// Largest megamorphic table accepted from a config file
pub const MAX_TABLE_SIZE: usize = 1 << 20;

/// Properties that get a canned handler independent of the receiver shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapIndependentHandlers {
    /// `"length"` on primitive strings
    pub string_length: bool,
    /// `"length"` on `String` wrapper objects
    pub string_wrapper_length: bool,
    /// `"prototype"` on constructors
    pub function_prototype: bool,
    /// Native accessors aliasing a built-in slot (array `length`)
    pub builtin_fields: bool,
    /// Module namespace exports
    pub module_exports: bool,
    /// Simple API getters and setters. When off they go through the
    /// shape-keyed handler cache instead.
    pub api_getters: bool,
}

impl Default for MapIndependentHandlers {
    fn default() -> Self {
        Self {
            string_length: true,
            string_wrapper_length: true,
            function_prototype: true,
            builtin_fields: true,
            module_exports: true,
            api_getters: false,
        }
    }
}

impl MapIndependentHandlers {
    /// Every shortcut disabled
    pub fn none() -> Self {
        Self {
            string_length: false,
            string_wrapper_length: false,
            function_prototype: false,
            builtin_fields: false,
            module_exports: false,
            api_getters: false,
        }
    }
}

/// Inline cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IcConfig {
    /// Update feedback at all. With this off every access takes the
    /// generic path.
    pub use_ic: bool,
    /// Shapes a named site tracks before going megamorphic
    pub max_polymorphic: usize,
    /// Shapes a keyed element site tracks before going megamorphic
    pub max_keyed_polymorphic: usize,
    /// Entries in the primary megamorphic table (power of two)
    pub primary_table_size: usize,
    /// Entries in the secondary megamorphic table (power of two)
    pub secondary_table_size: usize,
    /// Emit an `otter::ic` event for every state change
    pub trace_ic: bool,
    /// Count handler kinds as they are computed
    pub handler_stats: bool,
    /// Canned handler allow-list
    pub map_independent: MapIndependentHandlers,
}

impl Default for IcConfig {
    fn default() -> Self {
        Self {
            use_ic: true,
            max_polymorphic: 4,
            max_keyed_polymorphic: 4,
            primary_table_size: 2048,
            secondary_table_size: 512,
            trace_ic: false,
            handler_stats: false,
            map_independent: MapIndependentHandlers::default(),
        }
    }
}

impl IcConfig {
    /// Create a config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable feedback collection
    pub fn with_use_ic(mut self, use_ic: bool) -> Self {
        self.use_ic = use_ic;
        self
    }

    /// Set the polymorphic capacity of named sites
    pub fn with_max_polymorphic(mut self, max: usize) -> Self {
        self.max_polymorphic = max.max(1);
        self
    }

    /// Set the polymorphic capacity of keyed element sites
    pub fn with_max_keyed_polymorphic(mut self, max: usize) -> Self {
        self.max_keyed_polymorphic = max.max(1);
        self
    }

    /// Set the megamorphic table sizes, rounded up to powers of two
    pub fn with_table_sizes(mut self, primary: usize, secondary: usize) -> Self {
        self.primary_table_size = primary.max(1).next_power_of_two();
        self.secondary_table_size = secondary.max(1).next_power_of_two();
        self
    }

    /// Enable IC transition tracing
    pub fn with_trace_ic(mut self, trace: bool) -> Self {
        self.trace_ic = trace;
        self
    }

    /// Enable handler statistics
    pub fn with_handler_stats(mut self, enabled: bool) -> Self {
        self.handler_stats = enabled;
        self
    }

    /// Replace the canned handler allow-list
    pub fn with_map_independent(mut self, handlers: MapIndependentHandlers) -> Self {
        self.map_independent = handlers;
        self
    }

    /// Parse from JSON, filling absent fields with defaults
    pub fn from_json(json: &str) -> IcResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        let config = config.normalized();
        config.validate()?;
        Ok(config)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> IcResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check that table sizes stay within bounds
    pub fn validate(&self) -> IcResult<()> {
        for (table, size) in [
            ("primary_table_size", self.primary_table_size),
            ("secondary_table_size", self.secondary_table_size),
        ] {
            if size > MAX_TABLE_SIZE {
                return Err(IcError::InvalidConfig(format!(
                    "{table} is {size}, at most {MAX_TABLE_SIZE} entries are allowed"
                )));
            }
        }
        Ok(())
    }

    fn normalized(self) -> Self {
        let (primary, secondary) = (self.primary_table_size, self.secondary_table_size);
        Self {
            max_polymorphic: self.max_polymorphic.max(1),
            max_keyed_polymorphic: self.max_keyed_polymorphic.max(1),
            ..self
        }
        .with_table_sizes(primary, secondary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = IcConfig::default();
        assert!(config.use_ic);
        assert_eq!(config.max_polymorphic, 4);
        assert_eq!(config.max_keyed_polymorphic, 4);
        assert_eq!(config.primary_table_size, 2048);
        assert_eq!(config.secondary_table_size, 512);
        assert!(config.map_independent.string_length);
        assert!(!config.map_independent.api_getters);
    }

    #[test]
    fn test_json_partial() {
        let config = IcConfig::from_json(r#"{"max_polymorphic": 2, "primary_table_size": 1000}"#).unwrap();
        assert_eq!(config.max_polymorphic, 2);
        assert_eq!(config.primary_table_size, 1024);
        assert_eq!(config.secondary_table_size, 512);
        assert!(config.use_ic);
    }

    #[test]
    fn test_json_rejects_oversized_tables() {
        let err = IcConfig::from_json(r#"{"secondary_table_size": 4194304}"#).unwrap_err();
        assert!(matches!(err, IcError::InvalidConfig(_)));
        assert!(matches!(IcConfig::from_json("{"), Err(IcError::Json(_))));
    }

    #[test]
    fn test_json_roundtrip() {
        let config = IcConfig::new().with_trace_ic(true).with_map_independent(MapIndependentHandlers::none());
        let parsed = IcConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }
}
