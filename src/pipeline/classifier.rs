//! Extension → category mapping
//!
//! The table is built once from the configuration and never changes afterwards.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct CategoryClassifier {
	table: HashMap<String, String>,
	default_label: String,
}

impl CategoryClassifier {
	/// Build the lookup table from `label -> extensions`.
	///
	/// Extensions are normalized the same way lookups are, so the configuration
	/// may list `"JPG"` or `".jpg"`. When an extension is listed under several
	/// labels the alphabetically first label wins.
	pub fn new(categories: &BTreeMap<String, Vec<String>>, default_label: &str) -> Self {
		let mut table = HashMap::new();
		for (label, extensions) in categories {
			for extension in extensions {
				let key = normalize_extension(extension);
				if key.is_empty() {
					continue;
				}
				table.entry(key).or_insert_with(|| label.clone());
			}
		}

		Self { table, default_label: default_label.to_string() }
	}

	/// Category label for an extension, case-insensitively, with or without the dot.
	pub fn classify(&self, extension: &str) -> &str {
		self.table
			.get(&normalize_extension(extension))
			.map(String::as_str)
			.unwrap_or(&self.default_label)
	}

	/// Category label for a path; files without an extension get the default label.
	pub fn classify_path(&self, path: &Path) -> &str {
		match path.extension() {
			Some(extension) => self.classify(&extension.to_string_lossy()),
			None => &self.default_label,
		}
	}

	pub fn default_label(&self) -> &str {
		&self.default_label
	}

	pub fn len(&self) -> usize {
		self.table.len()
	}

	pub fn is_empty(&self) -> bool {
		self.table.is_empty()
	}
}

fn normalize_extension(extension: &str) -> String {
	extension.trim().trim_start_matches('.').to_lowercase()
}
