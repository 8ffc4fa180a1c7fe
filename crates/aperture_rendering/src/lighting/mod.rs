//! Light binning for forward shading.

mod tiled;

pub use tiled::{TileGrid, TilePass, TileStats, TiledLightCuller};
