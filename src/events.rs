use chrono::{DateTime, Utc};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum EventType {
	Create,
	Write,
	Remove,
	RenameFrom, // Old name in rename operation
	RenameTo,   // New name in rename operation
	Rename,     // Either side of a rename; macOS reports renames this way
	Chmod,
	Other(String),
}

impl From<notify::EventKind> for EventType {
	fn from(kind: notify::EventKind) -> Self {
		use notify::event::{MetadataKind, ModifyKind, RenameMode};

		match kind {
			notify::EventKind::Create(_) => EventType::Create,
			notify::EventKind::Modify(modify_kind) => match modify_kind {
				ModifyKind::Name(name_kind) => match name_kind {
					RenameMode::From => EventType::RenameFrom,
					RenameMode::To => EventType::RenameTo,
					_ => EventType::Rename,
				},
				ModifyKind::Metadata(MetadataKind::Permissions) => EventType::Chmod,
				_ => EventType::Write,
			},
			notify::EventKind::Remove(_) => EventType::Remove,
			notify::EventKind::Access(_) => EventType::Other("Access".to_string()),
			notify::EventKind::Other => EventType::Other("Unknown".to_string()),
			_ => EventType::Other(format!("{kind:?}")),
		}
	}
}

#[derive(Debug, Clone)]
pub struct FileSystemEvent {
	pub id: Uuid,
	pub event_type: EventType,
	pub path: PathBuf,
	pub timestamp: DateTime<Utc>,
	pub is_directory: bool,
	pub size: Option<u64>,
}

impl FileSystemEvent {
	pub fn new(
		event_type: EventType, path: PathBuf, is_directory: bool, size: Option<u64>,
	) -> Self {
		Self { id: Uuid::new_v4(), event_type, path, timestamp: Utc::now(), is_directory, size }
	}

	/// Whether this event may announce a file under a new name: a creation or a
	/// rename that is not known to be the source side. These are the events that
	/// start a candidate; an undirected rename of the old name is filtered out
	/// later because that path no longer exists.
	pub fn announces_file(&self) -> bool {
		!self.is_directory
			&& matches!(self.event_type, EventType::Create | EventType::RenameTo | EventType::Rename)
	}
}
