//! An explicit, caller-owned session over the tracking service: entity
//! queries, version numbering, and the review-media submission workflow.

use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use super::{EntityRef, Filter, Record, Sort, TrackingError, TrackingService};
use crate::engine::{
    encode, sequence, EncodeError, EncodeInput, EncodeOptions, EncodeRequest, Encoder,
    SequenceError,
};

/// Review media formats accepted for submission (image sequences only).
const REVIEW_IMAGE_FORMATS: &[&str] = &[".jpg", ".exr"];

/// Suffix baked into generated version names.
const SUBMIT_TAG: &str = "Review";

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("{0} is not a supported review media format")]
    UnsupportedFormat(String),

    #[error(transparent)]
    Sequence(#[from] SequenceError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Tracking(#[from] TrackingError),

    #[error("failed to generate temporary media {0}")]
    MissingOutput(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Common query knobs shared by all entity lookups.
#[derive(Debug, Clone)]
pub struct QueryOpts {
    /// Exact-name filter (matched on `name` or `code`, per entity type).
    pub name: Option<String>,
    /// Restrict to active / in-progress entities.
    pub active_only: bool,
    pub extra_fields: Vec<String>,
    pub extra_filters: Vec<Filter>,
    pub sort: Option<Sort>,
}

impl Default for QueryOpts {
    fn default() -> Self {
        Self {
            name: None,
            active_only: true,
            extra_fields: Vec::new(),
            extra_filters: Vec::new(),
            sort: None,
        }
    }
}

fn merged_fields<'a>(base: &[&'a str], extra: &'a [String]) -> Vec<&'a str> {
    base.iter()
        .copied()
        .chain(extra.iter().map(String::as_str))
        .collect()
}

fn entity_value(entity: &EntityRef) -> Value {
    json!({ "type": entity.kind, "id": entity.id })
}

/// A verified connection to the tracking service. Owned by the caller and
/// passed explicitly; there is deliberately no process-wide cached client.
pub struct Session<S: TrackingService> {
    service: S,
}

impl<S: TrackingService> Session<S> {
    /// Verify access with a trivial query before handing the session out.
    pub fn connect(service: S) -> Result<Self, TrackingError> {
        service.find("Project", &[], &["id"], &[])?;
        Ok(Self { service })
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn projects(&self, opts: &QueryOpts) -> Result<Vec<Record>, TrackingError> {
        let fields = merged_fields(&["name", "code", "id", "sg_status"], &opts.extra_fields);

        let mut filters = Vec::new();
        if let Some(name) = &opts.name {
            filters.push(Filter::is("name", json!(name)));
        }
        filters.extend(opts.extra_filters.iter().cloned());
        if opts.active_only {
            filters.push(Filter::is("sg_status", json!("Active")));
        }

        let order = [opts.sort.clone().unwrap_or_else(|| Sort::asc("name"))];
        self.service.find("Project", &filters, &fields, &order)
    }

    pub fn assets(&self, project: &EntityRef, opts: &QueryOpts) -> Result<Vec<Record>, TrackingError> {
        let fields = merged_fields(
            &["name", "code", "id", "sg_status_list", "project", "shots"],
            &opts.extra_fields,
        );

        let mut filters = vec![Filter::is("project", entity_value(project))];
        filters.extend(opts.extra_filters.iter().cloned());
        if opts.active_only {
            filters.push(Filter::is("sg_status_list", json!("ip")));
        }

        let order = [opts.sort.clone().unwrap_or_else(|| Sort::asc("code"))];
        self.service.find("Asset", &filters, &fields, &order)
    }

    pub fn sequences(&self, project: &EntityRef, opts: &QueryOpts) -> Result<Vec<Record>, TrackingError> {
        let fields = merged_fields(
            &["name", "code", "id", "sg_status_list", "project", "shots"],
            &opts.extra_fields,
        );

        let mut filters = vec![Filter::is("project", entity_value(project))];
        if let Some(name) = &opts.name {
            filters.push(Filter::is("code", json!(name)));
        }
        filters.extend(opts.extra_filters.iter().cloned());
        if opts.active_only {
            filters.push(Filter::is("sg_status_list", json!("ip")));
        }

        let order = [opts.sort.clone().unwrap_or_else(|| Sort::asc("code"))];
        self.service.find("Sequence", &filters, &fields, &order)
    }

    pub fn shots(&self, sequence: &EntityRef, opts: &QueryOpts) -> Result<Vec<Record>, TrackingError> {
        let fields = merged_fields(&["name", "code", "id", "project"], &opts.extra_fields);

        let mut filters = vec![Filter::is("sg_sequence", entity_value(sequence))];
        if let Some(name) = &opts.name {
            filters.push(Filter::is("code", json!(name)));
        }
        filters.extend(opts.extra_filters.iter().cloned());
        if opts.active_only {
            filters.push(Filter::is("sg_status_list", json!("ip")));
        }

        let order = [opts.sort.clone().unwrap_or_else(|| Sort::asc("code"))];
        self.service.find("Shot", &filters, &fields, &order)
    }

    pub fn tasks(&self, shot: &EntityRef, opts: &QueryOpts) -> Result<Vec<Record>, TrackingError> {
        let fields = merged_fields(
            &["cached_display_name", "name", "code", "id", "entity", "project"],
            &opts.extra_fields,
        );

        let mut filters = vec![Filter::is("entity", entity_value(shot))];
        filters.extend(opts.extra_filters.iter().cloned());

        self.service.find("Task", &filters, &fields, &[])
    }

    pub fn task_versions(&self, task: &EntityRef, opts: &QueryOpts) -> Result<Vec<Record>, TrackingError> {
        let fields = merged_fields(&["code"], &opts.extra_fields);

        let mut filters = vec![Filter::is("sg_task", entity_value(task))];
        filters.extend(opts.extra_filters.iter().cloned());

        self.service.find("Version", &filters, &fields, &[])
    }

    /// Next free version code for a task: `<base>_vNNNN`, one past the
    /// highest trailing number among existing codes with that prefix.
    pub fn unique_version_name(&self, task: &EntityRef, base: &str) -> Result<String, TrackingError> {
        let prefix = format!("{base}_v");

        let opts = QueryOpts {
            extra_filters: vec![Filter::starts_with("code", prefix.clone())],
            active_only: false,
            ..QueryOpts::default()
        };
        let versions = self.task_versions(task, &opts)?;

        let mut current = 0u64;
        for version in &versions {
            let Some(code) = version.str_field("code") else {
                continue;
            };
            if let Some(run) = sequence::trailing_digits(code) {
                if let Ok(number) = run.parse::<u64>() {
                    current = current.max(number);
                }
            }
        }

        Ok(format!("{prefix}{:04}", current + 1))
    }

    /// Create a Version under a task, with a unique `<base>_vNNNN` code.
    pub fn create_version(
        &self,
        task: &Record,
        base_name: &str,
        comment: &str,
    ) -> Result<Record, TrackingError> {
        if task.kind() != Some("Task") {
            return Err(TrackingError::Request(
                "version creation requires a Task entity".to_string(),
            ));
        }
        let task_ref = task
            .entity_ref()
            .ok_or_else(|| TrackingError::Request("task record has no id".to_string()))?;

        let code = self.unique_version_name(&task_ref, base_name)?;

        let mut data = Record::new();
        if let Some(project) = task.get("project") {
            data.insert("project", project.clone());
        }
        data.insert("code", json!(code));
        data.insert("description", json!(comment));
        data.insert("sg_task", entity_value(&task_ref));
        if let Some(entity) = task.get("entity") {
            data.insert("entity", entity.clone());
        }

        self.service.create("Version", &data)
    }
}

/// Per-submission temp directory, removed on drop so failed submissions
/// cannot accumulate workspaces.
struct Workspace(PathBuf);

impl Drop for Workspace {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.0);
    }
}

/// Encode an image sequence to a temporary movie and attach it to a new
/// Version under `task`.
///
/// The encode happens before anything touches the service; an upload
/// failure deletes the just-created Version so no empty shell is left
/// behind.
pub fn submit_review_media<S, F>(
    session: &Session<S>,
    task: &Record,
    media_path: &Path,
    comment: &str,
    encoder: &Encoder,
    opts: &EncodeOptions,
    sink: F,
) -> Result<Record, SubmitError>
where
    S: TrackingService,
    F: FnMut(u64),
{
    let ext = media_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default();

    if !REVIEW_IMAGE_FORMATS.contains(&ext.as_str()) {
        return Err(SubmitError::UnsupportedFormat(ext));
    }

    let workspace = Workspace(
        std::env::temp_dir()
            .join("shotsub")
            .join(Uuid::new_v4().to_string()),
    );
    fs::create_dir_all(&workspace.0)?;
    let temp_media = workspace.0.join("review_upload.mov");

    let descriptor = sequence::resolve(media_path)?;
    tracing::info!(
        frames = descriptor.frame_count,
        start = %descriptor.start_frame,
        "encoding review media"
    );

    let request = EncodeRequest::new(EncodeInput::Sequence(descriptor), temp_media.clone());
    encode::encode(encoder, &request, opts, sink)?;

    if !temp_media.is_file() || fs::metadata(&temp_media)?.len() == 0 {
        return Err(SubmitError::MissingOutput(temp_media));
    }

    let entity_name = task.linked_name("entity").unwrap_or("entity");
    let display = task
        .str_field("cached_display_name")
        .or_else(|| task.str_field("name"))
        .unwrap_or("task");
    let base_name = format!("{entity_name}_{display}_{SUBMIT_TAG}");

    let version = session.create_version(task, &base_name, comment)?;
    let version_id = version
        .id()
        .ok_or_else(|| TrackingError::Request("Version create returned no id".to_string()))
        .map_err(SubmitError::Tracking)?;

    let display_name = temp_media
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "review_upload.mov".to_string());

    if let Err(err) = session.service().upload(
        "Version",
        version_id,
        &temp_media,
        "sg_uploaded_movie",
        &display_name,
    ) {
        // Don't leave a Version with no media attached.
        let _ = session.service().delete("Version", version_id);
        return Err(err.into());
    }

    tracing::info!(version = version_id, "review media uploaded");

    Ok(version)
}
