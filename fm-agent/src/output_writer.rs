use crate::event::EventPayload;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send_event(&self, payload: &EventPayload) -> Result<()>;
}

/// Local sink: one JSON document per event under `<output_dir>/<event type>/`.
#[derive(Debug, Clone)]
pub struct FileWriter {
    output_dir: PathBuf,
}

impl FileWriter {
    pub fn new(output_dir: PathBuf) -> Self {
        Self { output_dir }
    }

    fn sanitize_component(component: &str) -> String {
        component
            .chars()
            .map(|ch| match ch {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => ch,
                _ => '_',
            })
            .collect()
    }

    fn directory_path(&self, event_type: &str) -> PathBuf {
        self.output_dir.join(Self::sanitize_component(event_type))
    }
}

#[async_trait]
impl EventSink for FileWriter {
    async fn send_event(&self, payload: &EventPayload) -> Result<()> {
        let directory = self.directory_path(&payload.event_type);
        fs::create_dir_all(&directory)
            .await
            .with_context(|| format!("failed to create directory {}", directory.display()))?;

        let filename = format!(
            "{}_{}.json",
            Self::sanitize_component(&payload.file_name),
            Uuid::new_v4()
        );
        let final_path = directory.join(&filename);
        let temp_path = directory.join(format!("{filename}.tmp"));

        let serialized =
            serde_json::to_vec_pretty(payload).context("failed to encode event for file output")?;

        fs::write(&temp_path, &serialized)
            .await
            .with_context(|| format!("failed to write {}", temp_path.display()))?;

        fs::rename(&temp_path, &final_path).await.with_context(|| {
            format!(
                "failed to rename {} to {}",
                temp_path.display(),
                final_path.display()
            )
        })?;

        debug!(
            status = %payload.status,
            file = %payload.file_name,
            output = %final_path.display(),
            "persisted event to local sink"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> EventPayload {
        EventPayload {
            event_type: "Total Received file".to_string(),
            client_name: "NCR".to_string(),
            status: "Received".to_string(),
            file_name: "report 1/2.csv".to_string(),
            category: "General".to_string(),
            expected_time: "2024-01-03 09:00:00".to_string(),
        }
    }

    #[tokio::test]
    async fn writes_one_json_file_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FileWriter::new(dir.path().to_path_buf());
        writer.send_event(&payload()).await.unwrap();
        writer.send_event(&payload()).await.unwrap();

        let event_dir = dir.path().join("Total_Received_file");
        let files: Vec<_> = std::fs::read_dir(&event_dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(files.len(), 2);
        for path in files {
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            assert!(name.starts_with("report_1_2.csv_"));
            assert!(name.ends_with(".json"));
            let value: serde_json::Value =
                serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
            assert_eq!(value["clientName"], "NCR");
            assert_eq!(value["expectedTime"], "2024-01-03 09:00:00");
        }
    }
}
