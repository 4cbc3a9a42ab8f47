//! Engine-wide defaults, kept in one place so the magic numbers are easy to find.

use std::time::Duration;

/// How long a vendor script/API load may take before it fails.
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Zoom range used when the consumer does not constrain it.
pub const DEFAULT_MIN_ZOOM: f64 = 0.0;
pub const DEFAULT_MAX_ZOOM: f64 = 22.0;

/// Initial zoom when the `zoom` prop is absent.
pub const DEFAULT_ZOOM: f64 = 3.0;

/// Pixel padding used by `fit_bounds` when none is given.
pub const DEFAULT_FIT_PADDING: f64 = 20.0;

/// Id given to the cluster group derived from `clusterMarkers`.
pub const DEFAULT_CLUSTER_ID: &str = "markers";

/// Id given to the base tile layer derived from `tilesUrl`.
pub const BASE_LAYER_ID: &str = "base";

/// Default OpenStreetMap raster template for tile-based providers.
pub const DEFAULT_TILES_URL: &str = "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png";

pub const DEFAULT_ATTRIBUTION: &str = "&copy; OpenStreetMap contributors";

/// Convergence threshold (degrees) for iterative datum inversion.
pub const DATUM_INVERSION_EPSILON: f64 = 1e-10;

/// Iteration cap for iterative datum inversion.
pub const DATUM_INVERSION_MAX_ITERATIONS: usize = 30;
