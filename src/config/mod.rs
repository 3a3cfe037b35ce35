//! Layer and source configuration.
//!
//! Configurations are plain structs with builders. Layer configurations can
//! also be loaded from the JSON surface used by the application shell:
//!
//! ```json
//! [{
//!   "layerId": "subscribers",
//!   "identityField": "accountNumber",
//!   "allowsEmptyUpdates": false,
//!   "supportsIncrementalPatch": true,
//!   "debounceMs": 500,
//!   "pollIntervalMs": 60000
//! }]
//! ```

mod fetch;
mod layer;

pub use fetch::*;
pub use layer::*;
