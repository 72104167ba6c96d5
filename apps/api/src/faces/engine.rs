//! Face embedding extraction behind a pluggable trait.
//!
//! `FaceEngine` is the production backend: the dlib face detector,
//! landmark predictor, and ResNet encoder are loaded exactly once at
//! startup and owned by a dedicated worker thread. Handlers talk to the
//! worker over a channel, which keeps the non-`Send` dlib types off the
//! async runtime while still sharing one model instance process-wide.

use std::path::PathBuf;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use dlib_face_recognition::{
    FaceDetector, FaceDetectorTrait, FaceEncoderNetwork, FaceEncoderTrait, ImageMatrix,
    LandmarkPredictor, LandmarkPredictorTrait,
};
use image::RgbImage;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::errors::AppError;

/// 128-dimensional face descriptor produced by the dlib encoder.
pub type Embedding = Vec<f64>;

/// Embedding backend seam. Production wraps dlib; tests substitute stubs
/// so nothing in the test suite needs the model files.
#[async_trait]
pub trait FaceEmbedder: Send + Sync {
    /// Returns one embedding per detected face, in detection order.
    /// An empty vec means no face was found; callers decide whether that
    /// is an error (new uploads) or a skip (scanning stored photos).
    async fn embed(&self, image: RgbImage) -> Result<Vec<Embedding>, AppError>;
}

#[derive(Debug, Clone)]
pub struct FaceModelPaths {
    pub landmark: PathBuf,
    pub encoder: PathBuf,
}

struct Job {
    image: RgbImage,
    reply: oneshot::Sender<Vec<Embedding>>,
}

pub struct FaceEngine {
    jobs: mpsc::Sender<Job>,
}

impl FaceEngine {
    /// Loads the dlib models on a dedicated thread and returns once they
    /// are ready. Model-load failures surface here, at startup, rather
    /// than on the first registration.
    pub fn spawn(models: FaceModelPaths, num_jitters: u32) -> anyhow::Result<Self> {
        let (job_tx, mut job_rx) = mpsc::channel::<Job>(32);
        let (init_tx, init_rx) = std::sync::mpsc::channel::<anyhow::Result<()>>();

        std::thread::Builder::new()
            .name("face-engine".to_string())
            .spawn(move || {
                let stack = match DlibStack::load(&models) {
                    Ok(stack) => {
                        let _ = init_tx.send(Ok(()));
                        stack
                    }
                    Err(e) => {
                        let _ = init_tx.send(Err(e));
                        return;
                    }
                };
                info!("face engine ready");

                while let Some(job) = job_rx.blocking_recv() {
                    let embeddings = stack.extract(&job.image, num_jitters);
                    // Receiver may have timed out or hung up; nothing to do.
                    let _ = job.reply.send(embeddings);
                }
            })
            .context("failed to spawn face engine thread")?;

        init_rx
            .recv()
            .context("face engine thread exited before reporting readiness")??;

        Ok(Self { jobs: job_tx })
    }
}

#[async_trait]
impl FaceEmbedder for FaceEngine {
    async fn embed(&self, image: RgbImage) -> Result<Vec<Embedding>, AppError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.jobs
            .send(Job {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| AppError::Internal(anyhow!("face engine is not running")))?;
        reply_rx
            .await
            .map_err(|_| AppError::Internal(anyhow!("face engine dropped the request")))
    }
}

struct DlibStack {
    detector: FaceDetector,
    predictor: LandmarkPredictor,
    encoder: FaceEncoderNetwork,
}

impl DlibStack {
    fn load(models: &FaceModelPaths) -> anyhow::Result<Self> {
        debug!(path = %models.landmark.display(), "loading landmark model");
        let predictor = LandmarkPredictor::open(&models.landmark).map_err(|message| {
            anyhow!(
                "failed to load landmark model {}: {message}",
                models.landmark.display()
            )
        })?;

        debug!(path = %models.encoder.display(), "loading encoder model");
        let encoder = FaceEncoderNetwork::open(&models.encoder).map_err(|message| {
            anyhow!(
                "failed to load encoder model {}: {message}",
                models.encoder.display()
            )
        })?;

        Ok(Self {
            detector: FaceDetector::new(),
            predictor,
            encoder,
        })
    }

    fn extract(&self, image: &RgbImage, num_jitters: u32) -> Vec<Embedding> {
        let matrix = ImageMatrix::from_image(image);
        let locations = self.detector.face_locations(&matrix);

        let mut landmarks = Vec::with_capacity(locations.len());
        for rect in locations.iter() {
            landmarks.push(self.predictor.face_landmarks(&matrix, rect));
        }

        let encodings = self
            .encoder
            .get_face_encodings(&matrix, &landmarks, num_jitters);

        encodings
            .iter()
            .map(|encoding| encoding.as_ref().to_vec())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct StubEmbedder {
        faces: Vec<Embedding>,
    }

    #[async_trait]
    impl FaceEmbedder for StubEmbedder {
        async fn embed(&self, _image: RgbImage) -> Result<Vec<Embedding>, AppError> {
            Ok(self.faces.clone())
        }
    }

    #[tokio::test]
    async fn stub_backend_satisfies_the_embedder_seam() {
        let embedder: Arc<dyn FaceEmbedder> = Arc::new(StubEmbedder {
            faces: vec![vec![0.1; 128]],
        });

        let faces = embedder.embed(RgbImage::new(2, 2)).await.unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].len(), 128);
    }

    #[tokio::test]
    async fn stub_backend_can_report_no_faces() {
        let embedder = StubEmbedder { faces: vec![] };
        assert!(embedder.embed(RgbImage::new(2, 2)).await.unwrap().is_empty());
    }
}
