use anyhow::{Context, Result};
use eduvision_core::{AttendanceController, Enroller, FaceModels, FrameMailbox, Gallery, GalleryStore};
use eduvision_store::UserRepository;
use std::sync::{Arc, Mutex, PoisonError};
use tracing_subscriber::EnvFilter;

mod capture;
mod config;
mod dbus_interface;

use config::{BusKind, Config};

const BUS_NAME: &str = "org.eduvision.Attendance1";
const OBJECT_PATH: &str = "/org/eduvision/Attendance1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("eduvisiond starting");
    let config = Config::from_env();

    // Models and gallery are all-or-nothing: never run partially loaded.
    let models = FaceModels::load_onnx(
        &config.detector_model_path(),
        &config.encoder_model_path(),
        config.embedding_dim,
    )
    .context("failed to load face models")?;
    tracing::info!(model_dir = %config.model_dir.display(), "face models loaded");

    let gallery = load_gallery(&config, models.encoder.dimension())?;

    let users = Arc::new(
        UserRepository::open(&config.db_path)
            .with_context(|| format!("failed to open database {}", config.db_path.display()))?,
    );
    tracing::info!(path = %config.db_path.display(), "database opened");

    let mailbox = Arc::new(FrameMailbox::new());
    let enroller = Arc::new(Enroller::new(models.clone(), &config.photo_dir));
    let controller = Arc::new(Mutex::new(AttendanceController::new(
        Arc::clone(&mailbox),
        models,
        gallery,
        GalleryStore::new(&config.gallery_path),
        users.clone(),
        users.clone(),
        config.worker_config(),
    )));

    controller
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .start()
        .context("failed to start recognition")?;

    let replay = match &config.frame_dir {
        Some(dir) => Some(
            capture::FrameReplay::spawn(dir, config.frame_fps, Arc::clone(&mailbox))
                .context("failed to start frame source")?,
        ),
        None => {
            tracing::warn!("EDUVISION_FRAME_DIR not set; recognition idles until frames arrive");
            None
        }
    };

    let service = dbus_interface::AttendanceBus::new(Arc::clone(&controller), users, enroller);
    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(bus = ?config.bus, name = BUS_NAME, "eduvisiond ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("eduvisiond shutting down");

    if let Some(replay) = replay {
        let stats = replay.stop();
        tracing::info!(produced = stats.produced, replaced = stats.replaced, "frame source stopped");
    }
    let stopped = tokio::task::spawn_blocking(move || {
        controller.lock().unwrap_or_else(PoisonError::into_inner).stop()
    })
    .await?;
    if let Err(e) = stopped {
        tracing::warn!(error = %e, "recognition did not stop cleanly");
    }

    Ok(())
}

/// Load the gallery, refusing one built by an encoder of another dimension.
fn load_gallery(config: &Config, embedding_dim: usize) -> Result<Gallery> {
    let store = GalleryStore::new(&config.gallery_path);
    if !store.exists() && config.create_gallery {
        tracing::warn!(path = %store.path().display(), "no gallery found, creating an empty one");
        store
            .save(&Gallery::new())
            .context("failed to create empty gallery")?;
    }
    let gallery = store
        .load()
        .with_context(|| format!("failed to load gallery {}", store.path().display()))?;
    gallery.ensure_dimension(embedding_dim).with_context(|| {
        format!(
            "gallery {} does not match the face encoder",
            store.path().display()
        )
    })?;
    Ok(gallery)
}
