//! Wire protocol between the coordinator, the GPU worker, and progress
//! listeners.
//!
//! All frames are JSON objects tagged by a `type` field; binary payloads
//! (images, meshes) travel base64-encoded. The worker link is a single
//! bidirectional WebSocket; listener links are one-way streams per job.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::JobStatus;

/// GPU telemetry snapshot, sent periodically by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuSnapshot {
    pub vram_free_gb: f64,
    pub vram_used_gb: f64,
    pub vram_total_gb: f64,
    pub utilization_pct: f64,
    pub temp_c: f64,
    /// Whether the worker will accept a new job right now
    pub available: bool,
    pub model_loaded: bool,
}

/// Static worker identity, sent once after connect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub gpu_name: String,
    pub vram_total_gb: f64,
    pub worker_version: String,
}

/// Terminal result payload from the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCompletePayload {
    pub job_id: Uuid,
    pub stl_filename: Option<String>,
    pub stl_base64: Option<String>,
    pub glb_filename: Option<String>,
    pub glb_base64: Option<String>,
    #[serde(default)]
    pub vertex_count: i64,
    #[serde(default)]
    pub face_count: i64,
    #[serde(default)]
    pub is_watertight: bool,
    #[serde(default)]
    pub generation_time_s: f64,
    pub gpu_metrics: Option<Value>,
}

/// Messages the worker sends to the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    WorkerHello(WorkerInfo),
    GpuStatus(GpuSnapshot),
    JobProgress {
        job_id: Uuid,
        step: Option<String>,
        #[serde(default)]
        progress_pct: i32,
        message: Option<String>,
    },
    JobComplete(JobCompletePayload),
    JobFailed {
        job_id: Uuid,
        error: String,
        step: Option<String>,
    },
    Pong,
    WorkerBye {
        reason: Option<String>,
    },
    /// Any unrecognized `type`; logged and dropped by the router.
    #[serde(other)]
    Unknown,
}

/// Admin commands forwarded verbatim to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandAction {
    Pause,
    Resume,
    ForceProcess,
    /// Stop accepting new jobs; the worker does not interrupt a running
    /// pipeline.
    Cancel,
}

/// Messages the coordinator sends to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        message: String,
    },
    JobAssign {
        job_id: Uuid,
        image_filename: String,
        image_base64: String,
        settings: Value,
    },
    Command {
        action: CommandAction,
        #[serde(skip_serializing_if = "Option::is_none")]
        job_id: Option<Uuid>,
    },
    Ping,
}

/// Events streamed to a progress listener.
///
/// A listener session starts with one `status` snapshot, then live
/// `progress` events, and ends with `complete` or `failed`. `error` is only
/// sent when the requested job does not exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ListenerEvent {
    Status {
        job_id: Uuid,
        status: JobStatus,
        step: Option<String>,
        progress_pct: i32,
        message: Option<String>,
    },
    Progress {
        job_id: Uuid,
        step: Option<String>,
        progress_pct: i32,
        message: Option<String>,
    },
    Complete {
        job_id: Uuid,
        vertex_count: Option<i64>,
        face_count: Option<i64>,
        is_watertight: Option<bool>,
        generation_time_s: Option<f64>,
    },
    Failed {
        job_id: Uuid,
        error: Option<String>,
        step: Option<String>,
    },
    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_worker_hello_deserializes() {
        let msg: WorkerMessage = serde_json::from_value(json!({
            "type": "worker_hello",
            "gpu_name": "RTX 4090",
            "vram_total_gb": 24.0,
            "worker_version": "0.3.1"
        }))
        .unwrap();

        match msg {
            WorkerMessage::WorkerHello(info) => {
                assert_eq!(info.gpu_name, "RTX 4090");
                assert_eq!(info.vram_total_gb, 24.0);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_gpu_status_deserializes() {
        let msg: WorkerMessage = serde_json::from_value(json!({
            "type": "gpu_status",
            "vram_free_gb": 20.5,
            "vram_used_gb": 3.5,
            "vram_total_gb": 24.0,
            "utilization_pct": 11.0,
            "temp_c": 44.0,
            "available": true,
            "model_loaded": true
        }))
        .unwrap();

        match msg {
            WorkerMessage::GpuStatus(status) => {
                assert!(status.available);
                assert_eq!(status.vram_free_gb, 20.5);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_job_progress_defaults_pct() {
        let id = Uuid::now_v7();
        let msg: WorkerMessage = serde_json::from_value(json!({
            "type": "job_progress",
            "job_id": id,
            "step": "removing_background",
            "message": null
        }))
        .unwrap();

        match msg {
            WorkerMessage::JobProgress {
                job_id,
                progress_pct,
                ..
            } => {
                assert_eq!(job_id, id);
                assert_eq!(progress_pct, 0);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_becomes_unknown() {
        let msg: WorkerMessage =
            serde_json::from_value(json!({"type": "telepathy", "whatever": 1})).unwrap();
        assert_eq!(msg, WorkerMessage::Unknown);
    }

    #[test]
    fn test_job_assign_serializes_with_type_tag() {
        let id = Uuid::now_v7();
        let frame = ServerMessage::JobAssign {
            job_id: id,
            image_filename: "photo.png".to_string(),
            image_base64: "aGk=".to_string(),
            settings: json!({"steps": 50}),
        };

        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "job_assign");
        assert_eq!(value["image_filename"], "photo.png");
        assert_eq!(value["settings"]["steps"], 50);
    }

    #[test]
    fn test_command_omits_missing_job_id() {
        let value = serde_json::to_value(ServerMessage::Command {
            action: CommandAction::Pause,
            job_id: None,
        })
        .unwrap();

        assert_eq!(value["type"], "command");
        assert_eq!(value["action"], "pause");
        assert!(value.get("job_id").is_none());
    }

    #[test]
    fn test_force_process_action_is_snake_case() {
        let value = serde_json::to_value(CommandAction::ForceProcess).unwrap();
        assert_eq!(value, "force_process");
    }

    #[test]
    fn test_listener_terminal_event_shape() {
        let id = Uuid::now_v7();
        let value = serde_json::to_value(ListenerEvent::Complete {
            job_id: id,
            vertex_count: Some(12345),
            face_count: Some(24680),
            is_watertight: Some(true),
            generation_time_s: Some(42.0),
        })
        .unwrap();

        assert_eq!(value["type"], "complete");
        assert_eq!(value["vertex_count"], 12345);
    }

    #[test]
    fn test_listener_status_includes_job_status() {
        let id = Uuid::now_v7();
        let value = serde_json::to_value(ListenerEvent::Status {
            job_id: id,
            status: JobStatus::Processing,
            step: Some("gen".to_string()),
            progress_pct: 50,
            message: None,
        })
        .unwrap();

        assert_eq!(value["type"], "status");
        assert_eq!(value["status"], "processing");
    }
}
