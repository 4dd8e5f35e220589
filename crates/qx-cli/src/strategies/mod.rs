//! Built-in strategy plugins.
//!
//! Each plugin is an ordinary module here AND a scannable source file on
//! disk: the registry binds the plugin name to both the compiled factory
//! and the file name, and the loader refuses to build the bundle until
//! the file passes the import sandbox.

pub mod equal_weight;
pub mod ma_crossover;

use qx_strategy::StrategyRegistry;

/// Registry of the plugins shipped with this binary.
pub fn builtin_registry() -> StrategyRegistry {
    let mut registry = StrategyRegistry::new();
    // Registration of vetted built-ins cannot collide.
    registry
        .register("ma_crossover", "ma_crossover.rs", ma_crossover::bundle)
        .expect("builtin registration");
    registry
        .register("equal_weight", "equal_weight.rs", equal_weight::bundle)
        .expect("builtin registration");
    registry
}
