use crate::config::RenderConfig;
use crate::map::{Marker, MarkerLayer};
use anyhow::{bail, Context, Result};
use image::{ImageBuffer, Rgba, RgbaImage};
use rayon::prelude::*;
use std::collections::HashMap;
use std::f64::consts::PI;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

// Constants for Web Mercator
const TILE_SIZE: u32 = 256;
const MAX_LATITUDE: f64 = 85.051_128_78;

/// Overlay tiles are written under `{tile_dir}/markers/{z}/{x}/{y}.png`.
pub const LAYER_NAME: &str = "markers";

/// Deepest zoom level tiles are rendered for.
pub const MAX_ZOOM: u8 = 20;

const RING_ALPHA: u8 = 96;
const RING_WIDTH: f64 = 3.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderSummary {
    pub markers: usize,
    /// Tiles written, per zoom level.
    pub tiles: Vec<(u8, usize)>,
}

impl RenderSummary {
    pub fn total_tiles(&self) -> usize {
        self.tiles.iter().map(|(_, n)| n).sum()
    }
}

pub fn render_overlay(config: &RenderConfig, layer: &MarkerLayer) -> Result<RenderSummary> {
    if config.min_zoom > config.max_zoom {
        bail!(
            "min_zoom {} is greater than max_zoom {}",
            config.min_zoom,
            config.max_zoom
        );
    }
    if config.max_zoom > MAX_ZOOM {
        bail!("max_zoom {} is above the supported {}", config.max_zoom, MAX_ZOOM);
    }
    info!(
        min_zoom = config.min_zoom,
        max_zoom = config.max_zoom,
        "rendering marker overlay"
    );

    let markers: Vec<&Marker> = layer.iter().map(|(_, m)| m).collect();
    let layer_dir = config.tile_dir.join(LAYER_NAME);

    let tiles = (config.min_zoom..=config.max_zoom)
        .into_par_iter()
        .map(|z| {
            let written = render_zoom_level(&layer_dir, z, &markers, config.marker_radius)?;
            Ok::<_, anyhow::Error>((z, written))
        })
        .collect::<Result<Vec<_>>>()?;

    let summary = RenderSummary {
        markers: markers.len(),
        tiles,
    };
    info!(
        markers = summary.markers,
        tiles = summary.total_tiles(),
        "overlay rendered"
    );
    Ok(summary)
}

fn render_zoom_level(layer_dir: &Path, zoom: u8, markers: &[&Marker], radius: u32) -> Result<usize> {
    let mut local_tiles: HashMap<(u32, u32), RgbaImage> = HashMap::new();
    let world = world_size(zoom);

    for marker in markers {
        let (cx, cy) = lat_lng_to_world_pixel(marker.lat, marker.lng, zoom);
        let [r, g, b] = marker.color.rgb();
        let radius = radius as f64;
        let outer = if marker.pulse { radius + RING_WIDTH } else { radius };
        let reach = outer.ceil() as i64;

        for dy in -reach..=reach {
            for dx in -reach..=reach {
                let d = ((dx * dx + dy * dy) as f64).sqrt();
                let alpha = if d <= radius {
                    255
                } else if d <= outer {
                    RING_ALPHA
                } else {
                    continue;
                };

                let gx = cx as i64 + dx;
                let gy = cy as i64 + dy;
                if gx < 0 || gy < 0 || gx >= world || gy >= world {
                    continue;
                }
                let (tx, ty) = ((gx / TILE_SIZE as i64) as u32, (gy / TILE_SIZE as i64) as u32);
                let (px, py) = ((gx % TILE_SIZE as i64) as u32, (gy % TILE_SIZE as i64) as u32);

                let tile = local_tiles
                    .entry((tx, ty))
                    .or_insert_with(|| ImageBuffer::new(TILE_SIZE, TILE_SIZE));
                // Solid fill wins over a neighbour's translucent ring.
                if tile.get_pixel(px, py)[3] < alpha {
                    tile.put_pixel(px, py, Rgba([r, g, b, alpha]));
                }
            }
        }
    }

    let z_dir = layer_dir.join(zoom.to_string());
    fs::create_dir_all(&z_dir).context("Failed to create zoom directory")?;

    let written = local_tiles
        .par_iter()
        .filter(|((x, y), img)| {
            let x_dir = z_dir.join(x.to_string());
            if let Err(e) = fs::create_dir_all(&x_dir) {
                warn!(?x_dir, error = %e, "failed to create tile column");
                return false;
            }
            let path = x_dir.join(format!("{}.png", y));
            match img.save(&path) {
                Ok(()) => true,
                Err(e) => {
                    warn!(?path, error = %e, "failed to save tile");
                    false
                }
            }
        })
        .count();

    debug!(zoom, tiles = written, "zoom level rendered");
    Ok(written)
}

fn world_size(zoom: u8) -> i64 {
    (TILE_SIZE as i64) << zoom
}

/// Web Mercator position in global pixel space at `zoom`.
fn lat_lng_to_world_pixel(lat: f64, lng: f64, zoom: u8) -> (f64, f64) {
    let n = 2.0_f64.powi(zoom as i32) * TILE_SIZE as f64;
    let lat_rad = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
    let x = (lng + 180.0) / 360.0 * n;
    let y = (1.0 - (lat_rad.tan() + (1.0 / lat_rad.cos())).ln() / PI) / 2.0 * n;
    (x, y)
}

/// Tile column/row and the pixel within that tile. Zoom is capped at
/// [`MAX_ZOOM`].
pub fn lat_lng_to_tile_pixel(lat: f64, lng: f64, zoom: u8) -> (u32, u32, u32, u32) {
    let zoom = zoom.min(MAX_ZOOM);
    let (x, y) = lat_lng_to_world_pixel(lat, lng, zoom);
    let max = (world_size(zoom) - 1) as f64;
    let (x, y) = (x.clamp(0.0, max) as u32, y.clamp(0.0, max) as u32);
    (x / TILE_SIZE, y / TILE_SIZE, x % TILE_SIZE, y % TILE_SIZE)
}
