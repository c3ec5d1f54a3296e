use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use regex::Regex;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::datefmt::DateFormat;
use crate::record::{
    CourseEntry, EventRecord, RecordSource, ScheduleEntry, WeeklyClassEntry, ingest, lenient,
};
use crate::reload::ReloadSignal;

const UNKNOWN_FILE_NAME: &str = "Unknown";
/// Directory name that precedes the app-relative part of a saved file uri.
const FILE_DATA_ROOT: &str = "StuFlow/";
/// Container path that precedes the app-relative part of a saved picture uri.
const PICTURE_DATA_ROOT: &str = r"(?i)Application/[A-F0-9\-]+/(.*)";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedFile {
    #[serde(default, deserialize_with = "lenient::text")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub uri: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub color: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedPicture {
    #[serde(default, deserialize_with = "lenient::text")]
    pub uri: String,
}

/// Files and pictures the student keeps for one subject.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectFolder {
    #[serde(rename = "subName", default, deserialize_with = "lenient::text")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::entries")]
    pub files: Vec<SavedFile>,
    #[serde(default, deserialize_with = "lenient::entries")]
    pub pictures: Vec<SavedPicture>,
}

impl SubjectFolder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            files: vec![],
            pictures: vec![],
        }
    }
}

/// The per-user document. Keys this crate does not know are kept and
/// written back untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserDocument {
    #[serde(default, deserialize_with = "lenient::entries")]
    pub courses: Vec<CourseEntry>,

    #[serde(rename = "lichTuan", default, deserialize_with = "lenient::entries")]
    pub weekly_classes: Vec<WeeklyClassEntry>,

    #[serde(default, deserialize_with = "lenient::entries")]
    pub schedule: Vec<ScheduleEntry>,

    #[serde(rename = "itemSaved", default, deserialize_with = "lenient::entries")]
    pub subjects: Vec<SubjectFolder>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl UserDocument {
    /// Normalized records of one source for a render pass.
    pub fn records(&self, source: RecordSource) -> Vec<EventRecord> {
        match source {
            RecordSource::Courses => ingest(&self.courses),
            RecordSource::Classes => ingest(&self.weekly_classes),
            RecordSource::Schedule => ingest(&self.schedule),
        }
    }

    pub fn subject(&self, name: &str) -> Option<&SubjectFolder> {
        self.subjects.iter().find(|folder| folder.name == name)
    }

    fn subject_or_insert(&mut self, name: &str) -> &mut SubjectFolder {
        let idx = match self.subjects.iter().position(|folder| folder.name == name) {
            Some(idx) => idx,
            None => {
                self.subjects.push(SubjectFolder::new(name));
                self.subjects.len() - 1
            }
        };
        &mut self.subjects[idx]
    }
}

/// Local stand-in for the remote per-user document store: one JSON
/// document per user, replaced atomically on every write.
#[derive(Debug)]
pub struct DocumentStore {
    pub data_dir: PathBuf,
    pub users_dir: PathBuf,
    reload: Arc<ReloadSignal>,
}

impl DocumentStore {
    #[tracing::instrument(skip(data_dir, reload))]
    pub fn open(data_dir: &Path, reload: Arc<ReloadSignal>) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        let users_dir = data_dir.join("users");
        fs::create_dir_all(&users_dir)
            .with_context(|| format!("failed to create {}", users_dir.display()))?;

        info!(
            data_dir = %data_dir.display(),
            users = %users_dir.display(),
            "opened document store"
        );

        Ok(Self {
            data_dir,
            users_dir,
            reload,
        })
    }

    pub fn reload_signal(&self) -> &Arc<ReloadSignal> {
        &self.reload
    }

    pub fn document_path(&self, user: &str) -> anyhow::Result<PathBuf> {
        let user = validate_user(user)?;
        Ok(self.users_dir.join(format!("{user}.json")))
    }

    #[tracing::instrument(skip(self))]
    pub fn load(&self, user: &str) -> anyhow::Result<UserDocument> {
        let path = self.document_path(user)?;
        if !path.exists() {
            debug!(file = %path.display(), "no document yet; starting empty");
            return Ok(UserDocument::default());
        }

        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        if raw.trim().is_empty() {
            return Ok(UserDocument::default());
        }
        let doc: UserDocument = serde_json::from_str(&raw)
            .with_context(|| format!("failed parsing {}", path.display()))?;

        debug!(
            courses = doc.courses.len(),
            classes = doc.weekly_classes.len(),
            schedule = doc.schedule.len(),
            subjects = doc.subjects.len(),
            "loaded user document"
        );
        Ok(doc)
    }

    #[tracing::instrument(skip(self, doc))]
    pub fn save(&self, user: &str, doc: &UserDocument) -> anyhow::Result<()> {
        let path = self.document_path(user)?;
        save_json_atomic(&path, doc)
            .with_context(|| format!("failed to save document for {user}"))?;
        let generation = self.reload.notify(Utc::now());
        debug!(generation, "document saved");
        Ok(())
    }

    /// Adopts a document exported from the remote store.
    #[tracing::instrument(skip(self, source))]
    pub fn import(&self, user: &str, source: &Path) -> anyhow::Result<UserDocument> {
        let raw = fs::read_to_string(source)
            .with_context(|| format!("failed reading {}", source.display()))?;
        let doc: UserDocument = serde_json::from_str(&raw)
            .with_context(|| format!("failed parsing {}", source.display()))?;
        self.save(user, &doc)?;
        info!(file = %source.display(), "imported user document");
        Ok(doc)
    }

    fn mutate<R>(
        &self,
        user: &str,
        apply: impl FnOnce(&mut UserDocument) -> anyhow::Result<R>,
    ) -> anyhow::Result<R> {
        let mut doc = self.load(user)?;
        let out = apply(&mut doc)?;
        self.save(user, &doc)?;
        Ok(out)
    }

    #[tracing::instrument(skip(self))]
    pub fn add_schedule(
        &self,
        user: &str,
        at: NaiveDateTime,
        content: &str,
    ) -> anyhow::Result<ScheduleEntry> {
        let content = content.trim();
        if content.is_empty() {
            return Err(anyhow!("schedule content cannot be empty"));
        }

        let entry = ScheduleEntry {
            daystart: DateFormat::Iso.format(at.date()),
            name: content.to_string(),
            timestart: at.format("%H:%M").to_string(),
            color: pastel_color(),
        };

        self.mutate(user, |doc| {
            doc.schedule.push(entry.clone());
            Ok(())
        })?;
        info!(day = %entry.daystart, time = %entry.timestart, "schedule item added");
        Ok(entry)
    }

    /// Removes every schedule item equal to `target` on name, color and
    /// day. Returns how many were removed.
    #[tracing::instrument(skip(self, target), fields(name = %target.name))]
    pub fn remove_schedule(&self, user: &str, target: &ScheduleEntry) -> anyhow::Result<usize> {
        let removed = self.mutate(user, |doc| {
            let before = doc.schedule.len();
            doc.schedule.retain(|item| {
                !(item.name == target.name
                    && item.color == target.color
                    && item.daystart == target.daystart)
            });
            Ok(before - doc.schedule.len())
        })?;

        if removed == 0 {
            warn!("no schedule item matched");
        }
        Ok(removed)
    }

    #[tracing::instrument(skip(self))]
    pub fn add_subject(&self, user: &str, name: &str) -> anyhow::Result<Vec<SubjectFolder>> {
        let name = name.trim();
        if name.is_empty() {
            return Err(anyhow!("subject name cannot be empty"));
        }

        let mut doc = self.load(user)?;
        if doc.subject(name).is_some() {
            return Err(anyhow!("subject already exists: {name}"));
        }
        doc.subjects.push(SubjectFolder::new(name));
        self.save(user, &doc)?;
        Ok(doc.subjects)
    }

    #[tracing::instrument(skip(self))]
    pub fn remove_subject(&self, user: &str, name: &str) -> anyhow::Result<Vec<SubjectFolder>> {
        self.mutate(user, |doc| {
            doc.subjects.retain(|folder| folder.name != name);
            Ok(doc.subjects.clone())
        })
    }

    #[tracing::instrument(skip(self))]
    pub fn add_file(
        &self,
        user: &str,
        subject: &str,
        name: &str,
        uri: &str,
    ) -> anyhow::Result<SavedFile> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(anyhow!("file uri cannot be empty"));
        }

        let name = match name.trim() {
            "" => UNKNOWN_FILE_NAME,
            other => other,
        };
        let file = SavedFile {
            name: name.to_string(),
            uri: uri.to_string(),
            color: hex_color(),
        };

        self.mutate(user, |doc| {
            doc.subject_or_insert(subject).files.push(file.clone());
            Ok(())
        })?;
        Ok(file)
    }

    #[tracing::instrument(skip(self))]
    pub fn remove_file(
        &self,
        user: &str,
        subject: &str,
        uri: &str,
    ) -> anyhow::Result<Vec<SubjectFolder>> {
        self.mutate(user, |doc| {
            for folder in doc.subjects.iter_mut().filter(|f| f.name == subject) {
                folder.files.retain(|file| file.uri != uri);
            }
            Ok(doc.subjects.clone())
        })
    }

    #[tracing::instrument(skip(self))]
    pub fn add_picture(
        &self,
        user: &str,
        subject: &str,
        uri: &str,
    ) -> anyhow::Result<SavedPicture> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(anyhow!("picture uri cannot be empty"));
        }

        let picture = SavedPicture {
            uri: uri.to_string(),
        };
        self.mutate(user, |doc| {
            doc.subject_or_insert(subject)
                .pictures
                .push(picture.clone());
            Ok(())
        })?;
        Ok(picture)
    }

    #[tracing::instrument(skip(self))]
    pub fn remove_picture(
        &self,
        user: &str,
        subject: &str,
        uri: &str,
    ) -> anyhow::Result<Vec<SubjectFolder>> {
        self.mutate(user, |doc| {
            for folder in doc.subjects.iter_mut().filter(|f| f.name == subject) {
                folder.pictures.retain(|picture| picture.uri != uri);
            }
            Ok(doc.subjects.clone())
        })
    }

    /// Re-roots a saved file of `subject` onto `new_base`, keeping the part
    /// of its uri after the app data root. Returns the new uri.
    #[tracing::instrument(skip(self))]
    pub fn restore_file(
        &self,
        user: &str,
        subject: &str,
        uri: &str,
        new_base: &str,
    ) -> anyhow::Result<String> {
        let restored = restored_file_uri(uri, new_base)
            .ok_or_else(|| anyhow!("file uri has no app data root: {uri}"))?;
        let rewritten = self.mutate(user, |doc| {
            let mut rewritten = 0;
            for folder in doc.subjects.iter_mut().filter(|f| f.name == subject) {
                for file in folder.files.iter_mut().filter(|file| file.uri == uri) {
                    file.uri = restored.clone();
                    rewritten += 1;
                }
            }
            Ok(rewritten)
        })?;

        if rewritten == 0 {
            warn!("no saved file matched");
        }
        Ok(restored)
    }

    /// Same as [`DocumentStore::restore_file`] for pictures, whose uris carry
    /// an `Application/<container id>/` prefix and an optional `Documents/`.
    #[tracing::instrument(skip(self))]
    pub fn restore_picture(
        &self,
        user: &str,
        subject: &str,
        uri: &str,
        new_base: &str,
    ) -> anyhow::Result<String> {
        let restored = restored_picture_uri(uri, new_base)?
            .ok_or_else(|| anyhow!("picture uri has no app container: {uri}"))?;
        let rewritten = self.mutate(user, |doc| {
            let mut rewritten = 0;
            for folder in doc.subjects.iter_mut().filter(|f| f.name == subject) {
                for picture in folder.pictures.iter_mut().filter(|p| p.uri == uri) {
                    picture.uri = restored.clone();
                    rewritten += 1;
                }
            }
            Ok(rewritten)
        })?;

        if rewritten == 0 {
            warn!("no saved picture matched");
        }
        Ok(restored)
    }
}

fn rebase(new_base: &str, suffix: &str) -> String {
    format!("{}/{}", new_base.trim_end_matches('/'), suffix)
}

fn restored_file_uri(uri: &str, new_base: &str) -> Option<String> {
    let (_, suffix) = uri.rsplit_once(FILE_DATA_ROOT)?;
    Some(rebase(new_base, suffix))
}

fn restored_picture_uri(uri: &str, new_base: &str) -> anyhow::Result<Option<String>> {
    let container = Regex::new(PICTURE_DATA_ROOT)?;
    Ok(container.captures(uri).and_then(|caps| caps.get(1)).map(|suffix| {
        let suffix = suffix.as_str();
        rebase(new_base, suffix.strip_prefix("Documents/").unwrap_or(suffix))
    }))
}

fn validate_user(user: &str) -> anyhow::Result<&str> {
    let user = user.trim();
    if user.is_empty() {
        return Err(anyhow!("user id cannot be empty"));
    }
    if !user
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
        || user.starts_with('.')
    {
        return Err(anyhow!("invalid user id: {user}"));
    }
    Ok(user)
}

/// Light `rgba(r, g, b)` color with every channel in 200..=240.
fn pastel_color() -> String {
    let bytes = Uuid::new_v4().into_bytes();
    let [r, g, b] = [bytes[0], bytes[1], bytes[2]].map(|byte| 200 + u16::from(byte) % 41);
    format!("rgba({r}, {g}, {b})")
}

fn hex_color() -> String {
    let bytes = Uuid::new_v4().into_bytes();
    format!("#{:02x}{:02x}{:02x}", bytes[0], bytes[1], bytes[2])
}

#[tracing::instrument(skip(path, doc))]
fn save_json_atomic(path: &Path, doc: &UserDocument) -> anyhow::Result<()> {
    debug!(file = %path.display(), "saving document atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    let serialized = serde_json::to_string_pretty(doc)?;
    writeln!(temp, "{serialized}")?;
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::NaiveDate;
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;

    fn open_store() -> (tempfile::TempDir, DocumentStore) {
        let temp = tempdir().expect("tempdir");
        let store =
            DocumentStore::open(temp.path(), Arc::new(ReloadSignal::new())).expect("open store");
        (temp, store)
    }

    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 11, day)
            .and_then(|date| date.and_hms_opt(hour, minute, 0))
            .expect("valid datetime")
    }

    #[test]
    fn missing_document_loads_empty() {
        let (_temp, store) = open_store();
        let doc = store.load("student").expect("load");
        assert_eq!(doc, UserDocument::default());
    }

    #[test]
    fn schedule_items_are_added_and_removed_by_identity() {
        let (_temp, store) = open_store();
        let first = store
            .add_schedule("student", at(12, 17, 5), "Team meeting")
            .expect("add schedule");
        assert_eq!(first.daystart, "2025-11-12");
        assert_eq!(first.timestart, "17:05");
        assert!(first.color.starts_with("rgba("));

        let mut other_color = first.clone();
        other_color.color = "rgba(1, 2, 3)".to_string();
        let mut doc = store.load("student").expect("load");
        doc.schedule.push(other_color.clone());
        store.save("student", &doc).expect("save");

        assert_eq!(store.remove_schedule("student", &first).expect("remove"), 1);
        let remaining = store.load("student").expect("load").schedule;
        assert_eq!(remaining, vec![other_color]);
    }

    #[test]
    fn schedule_removal_needs_matching_name_and_day() {
        let (_temp, store) = open_store();
        let kept = store
            .add_schedule("student", at(12, 17, 5), "Team meeting")
            .expect("add schedule");

        let mut other_name = kept.clone();
        other_name.name = "Study group".to_string();
        let mut other_day = kept.clone();
        other_day.daystart = "2025-11-13".to_string();

        assert_eq!(store.remove_schedule("student", &other_name).expect("remove"), 0);
        assert_eq!(store.remove_schedule("student", &other_day).expect("remove"), 0);
        assert_eq!(store.load("student").expect("load").schedule, vec![kept]);
    }

    #[test]
    fn empty_schedule_content_is_rejected() {
        let (_temp, store) = open_store();
        assert!(store.add_schedule("student", at(12, 9, 0), "  ").is_err());
    }

    #[test]
    fn pastel_channels_stay_in_range() {
        for _ in 0..50 {
            let color = pastel_color();
            let inner = color
                .trim_start_matches("rgba(")
                .trim_end_matches(')')
                .split(", ")
                .map(|part| part.parse::<u16>().expect("channel"))
                .collect::<Vec<_>>();
            assert_eq!(inner.len(), 3);
            assert!(inner.iter().all(|c| (200..=240).contains(c)));
        }
    }

    #[test]
    fn duplicate_subject_is_rejected() {
        let (_temp, store) = open_store();
        store.add_subject("student", "Physics").expect("add subject");
        let err = store
            .add_subject("student", "Physics")
            .expect_err("duplicate subject");
        assert!(err.to_string().contains("already exists"));
        assert_eq!(store.load("student").expect("load").subjects.len(), 1);

        let left = store
            .remove_subject("student", "Physics")
            .expect("remove subject");
        assert!(left.is_empty());
    }

    #[test]
    fn files_and_pictures_create_missing_folders() {
        let (_temp, store) = open_store();
        let file = store
            .add_file("student", "Chemistry", "", "file:///notes/lab1.pdf")
            .expect("add file");
        assert_eq!(file.name, "Unknown");
        assert_eq!(file.color.len(), 7);

        store
            .add_picture("student", "Chemistry", "file:///pics/board.jpg")
            .expect("add picture");
        store
            .add_picture("student", "Biology", "file:///pics/cell.jpg")
            .expect("add picture");

        let doc = store.load("student").expect("load");
        let chemistry = doc.subject("Chemistry").expect("chemistry folder");
        assert_eq!(chemistry.files.len(), 1);
        assert_eq!(chemistry.pictures.len(), 1);
        assert!(doc.subject("Biology").is_some());

        let after = store
            .remove_file("student", "Chemistry", "file:///notes/lab1.pdf")
            .expect("remove file");
        assert!(after[0].files.is_empty());
        let after = store
            .remove_picture("student", "Biology", "file:///pics/cell.jpg")
            .expect("remove picture");
        assert!(after[1].pictures.is_empty());
    }

    #[test]
    fn restored_files_keep_their_app_relative_path() {
        let (_temp, store) = open_store();
        let old = "file:///var/mobile/Containers/Data/Application/OLD/Documents/StuFlow/Chemistry/lab1.pdf";
        store
            .add_file("student", "Chemistry", "Lab 1", old)
            .expect("add file");
        store
            .add_file("student", "Chemistry", "Lab 2", "file:///elsewhere/lab2.pdf")
            .expect("add file");
        store
            .add_file("student", "Physics", "Lab 1", old)
            .expect("add file");
        let generation = store.reload_signal().generation();

        let restored = store
            .restore_file("student", "Chemistry", old, "file:///new/Documents/StuFlow/")
            .expect("restore file");
        assert_eq!(restored, "file:///new/Documents/StuFlow/Chemistry/lab1.pdf");
        assert_eq!(store.reload_signal().generation(), generation + 1);

        let doc = store.load("student").expect("load");
        let chemistry = doc.subject("Chemistry").expect("chemistry folder");
        assert_eq!(chemistry.files[0].uri, restored);
        assert_eq!(chemistry.files[0].name, "Lab 1");
        assert_eq!(chemistry.files[1].uri, "file:///elsewhere/lab2.pdf");
        let physics = doc.subject("Physics").expect("physics folder");
        assert_eq!(physics.files[0].uri, old);

        assert!(
            store
                .restore_file("student", "Chemistry", "file:///elsewhere/lab2.pdf", "file:///new")
                .is_err()
        );
    }

    #[test]
    fn restored_pictures_drop_the_old_container() {
        let (_temp, store) = open_store();
        let old = "file:///var/mobile/Containers/Data/Application/9C1E2A4B-77D0-4F3A-B0C2-1D2E3F405162/Documents/ImagePicker/board.jpg";
        store
            .add_picture("student", "Biology", old)
            .expect("add picture");
        store
            .add_picture("student", "Biology", "file:///pics/cell.jpg")
            .expect("add picture");

        let restored = store
            .restore_picture("student", "Biology", old, "file:///new/Documents")
            .expect("restore picture");
        assert_eq!(restored, "file:///new/Documents/ImagePicker/board.jpg");

        let doc = store.load("student").expect("load");
        let biology = doc.subject("Biology").expect("biology folder");
        assert_eq!(biology.pictures[0].uri, restored);
        assert_eq!(biology.pictures[1].uri, "file:///pics/cell.jpg");

        assert!(
            store
                .restore_picture("student", "Biology", "file:///pics/cell.jpg", "file:///new")
                .is_err()
        );
    }

    #[test]
    fn every_write_notifies_reload_listeners() {
        let (_temp, store) = open_store();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        store.reload_signal().subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.add_subject("student", "Maths").expect("add subject");
        store
            .add_schedule("student", at(13, 8, 0), "Quiz prep")
            .expect("add schedule");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.reload_signal().generation(), 2);
    }

    #[test]
    fn malformed_entries_do_not_fail_the_document() {
        let (temp, store) = open_store();
        let export = temp.path().join("export.json");
        fs::write(
            &export,
            json!({
                "courses": [
                    {"daystart": "12/03/2025", "timestart": 1700000000, "eventtype": "due"},
                    "garbage",
                    {"daystart": "??"}
                ],
                "lichTuan": null,
                "schedule": [{"daystart": "2025-11-12", "name": "Gym", "timestart": "18:30"}],
                "avatar": "file:///me.png"
            })
            .to_string(),
        )
        .expect("write export");

        let doc = store.import("student", &export).expect("import");
        assert_eq!(doc.courses.len(), 2);
        assert_eq!(doc.records(RecordSource::Courses).len(), 1);
        assert!(doc.weekly_classes.is_empty());
        assert_eq!(doc.records(RecordSource::Schedule).len(), 1);

        let reloaded = store.load("student").expect("load");
        assert_eq!(reloaded.extra.get("avatar"), Some(&json!("file:///me.png")));
    }

    #[test]
    fn user_ids_cannot_escape_the_store() {
        let (_temp, store) = open_store();
        assert!(store.document_path("../etc/passwd").is_err());
        assert!(store.document_path("").is_err());
        assert!(store.document_path("student-42").is_ok());
    }
}
