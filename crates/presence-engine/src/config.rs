use presence_core::{QualityThresholds, TransitionPolicy};
use presence_sync::RetryPolicy;
use std::path::PathBuf;
use std::time::Duration;

/// Engine configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Minimum match confidence for a confirmed identity.
    pub confidence_threshold: f64,
    /// Quality gate rule thresholds.
    pub quality: QualityThresholds,
    /// Rejected captures allowed per identity before a reset is required.
    pub enroll_attempts: u32,
    /// Whether out-of-sequence event types are refused.
    pub transition_policy: TransitionPolicy,
    /// Dead-letter bound for queued submissions.
    pub retry: RetryPolicy,
    /// Path to the SQLite file backing the offline queue.
    pub queue_db_path: PathBuf,
    /// Seals queue payloads at rest when set.
    pub queue_passphrase: Option<String>,
    /// Period of the live detection loop.
    pub detection_interval: Duration,
}

impl Config {
    /// Load configuration from `PRESENCE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("presence");

        let queue_db_path = std::env::var("PRESENCE_QUEUE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("queue.db"));

        let defaults = QualityThresholds::default();
        let max_attempts = env_u32("PRESENCE_SYNC_MAX_ATTEMPTS", presence_sync::reconciler::DEFAULT_MAX_ATTEMPTS);

        Self {
            confidence_threshold: env_f64("PRESENCE_CONFIDENCE_THRESHOLD", 0.6),
            quality: QualityThresholds {
                min_detection_score: env_f32("PRESENCE_MIN_DETECTION_SCORE", defaults.min_detection_score),
                min_face_size: env_f32("PRESENCE_MIN_FACE_SIZE", defaults.min_face_size),
                max_pose_offset_ratio: env_f32("PRESENCE_MAX_POSE_RATIO", defaults.max_pose_offset_ratio),
            },
            enroll_attempts: env_u32(
                "PRESENCE_ENROLL_ATTEMPTS",
                presence_core::enrollment::DEFAULT_ENROLL_ATTEMPTS,
            ),
            transition_policy: if env_flag("PRESENCE_STRICT_TRANSITIONS") {
                TransitionPolicy::Strict
            } else {
                TransitionPolicy::Permissive
            },
            retry: retry_policy(max_attempts),
            queue_db_path,
            queue_passphrase: std::env::var("PRESENCE_QUEUE_PASSPHRASE")
                .ok()
                .filter(|p| !p.is_empty()),
            detection_interval: Duration::from_millis(env_u64("PRESENCE_DETECTION_INTERVAL_MS", 100)),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            confidence_threshold: presence_core::matcher::DEFAULT_CONFIDENCE_THRESHOLD,
            quality: QualityThresholds::default(),
            enroll_attempts: presence_core::enrollment::DEFAULT_ENROLL_ATTEMPTS,
            transition_policy: TransitionPolicy::default(),
            retry: RetryPolicy::default(),
            queue_db_path: PathBuf::from("queue.db"),
            queue_passphrase: None,
            detection_interval: Duration::from_millis(100),
        }
    }
}

/// Zero attempts means retry forever.
fn retry_policy(max_attempts: u32) -> RetryPolicy {
    match max_attempts {
        0 => RetryPolicy::unbounded(),
        n => RetryPolicy::bounded(n),
    }
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
