use std::sync::Arc;

use log::info;

use stock_net::checkpoint::CheckpointStore;
use stock_net::surface::render::{encode_png, render_frame, RenderOptions};
use stock_net::{Animation, SurfaceReconstructor, SurfaceRequest};

use crate::routes::{bytes_response, error_response, json_response, Reply};
use crate::state::{lock, SharedState, SurfaceCache};

/// Returns the cached surface for the current model directory, computing it
/// on first use. The lock is not held while the grid is evaluated.
fn surface_cache(state: &SharedState) -> Result<Arc<SurfaceCache>, Reply> {
    let (model_dir, visualization) = {
        let st = lock(state);
        if st.training.is_running() {
            return Err(error_response(409, "training is still running"));
        }
        if let Some(cache) = &st.surface {
            return Ok(cache.clone());
        }
        match &st.model_dir {
            Some(dir) => (dir.clone(), st.visualization.clone()),
            None => return Err(error_response(404, "no model has been trained yet")),
        }
    };

    let build = || -> stock_net::Result<SurfaceCache> {
        let bundle = CheckpointStore::open(&model_dir)?;
        let reconstructor =
            SurfaceReconstructor::from_bundle(&bundle, visualization.axes, visualization.sample_limit)?;
        let surface = reconstructor.compute_surface(&SurfaceRequest {
            range1: visualization.range1,
            range2: visualization.range2,
            resolution: visualization.resolution,
        })?;
        Ok(SurfaceCache {
            model_dir: model_dir.clone(),
            reconstructor,
            surface,
            snapshots: bundle.snapshot_refs,
            visualization: visualization.clone(),
        })
    };
    let cache = Arc::new(build().map_err(|e| error_response(422, &e.to_string()))?);
    info!("surface ready for {}", model_dir.display());

    let mut st = lock(state);
    // Only keep it if no new run replaced the model directory meanwhile.
    if st.model_dir.as_ref() == Some(&cache.model_dir) && !st.training.is_running() {
        st.surface = Some(cache.clone());
    }
    Ok(cache)
}

/// `GET /surface`
pub fn handle_surface(state: SharedState) -> Reply {
    match surface_cache(&state) {
        Ok(cache) => json_response(200, &cache.surface),
        Err(reply) => reply,
    }
}

/// `GET /surface/trajectory`
pub fn handle_trajectory(state: SharedState) -> Reply {
    let cache = match surface_cache(&state) {
        Ok(cache) => cache,
        Err(reply) => return reply,
    };
    let animation = Animation::new(&cache.reconstructor, &cache.surface, cache.snapshots.iter().cloned());
    match animation.trajectory() {
        Ok(points) => json_response(200, &points),
        Err(e) => error_response(422, &e.to_string()),
    }
}

/// `GET /surface/frame/<n>.png`
pub fn handle_frame(index: usize, state: SharedState) -> Reply {
    let cache = match surface_cache(&state) {
        Ok(cache) => cache,
        Err(reply) => return reply,
    };
    let animation = Animation::new(&cache.reconstructor, &cache.surface, cache.snapshots.iter().cloned());
    if index >= animation.len() {
        return error_response(404, &format!("frame {index} out of range ({} frames)", animation.len()));
    }

    let mut frame = None;
    for item in animation.frames().take(index + 1) {
        match item {
            Ok(f) => frame = Some(f),
            Err(e) => return error_response(422, &e.to_string()),
        }
    }
    let frame = match frame {
        Some(frame) => frame,
        None => return error_response(404, "frame not found"),
    };
    let options = RenderOptions::from(&cache.visualization);
    match render_frame(&cache.surface, &frame, &options).and_then(|img| encode_png(&img)) {
        Ok(png) => bytes_response(200, "image/png", png),
        Err(e) => error_response(500, &e.to_string()),
    }
}
