//! Bulk transfer
//!
//! Full-dataset export and import as a single JSON document:
//!
//! ```text
//! {
//!   "Customers": [ ... ],
//!   "Orders": [ ... ],
//!   "Files": [ ... ],
//!   "ConnectionDeviceDatas": [ ... ]
//! }
//! ```
//!
//! Both directions work record by record, so memory stays bounded by the
//! largest single attachment. Import replaces the store's contents; it is
//! not a merge.

mod export;
mod import;

use std::fmt;

/// Optional progress callback, called with values in `[0, 100]`
pub type ProgressFn<'a> = Option<&'a mut (dyn FnMut(f32) + Send)>;

/// One top-level array of the transfer document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Customers,
    Orders,
    Files,
    Connections,
}

impl Section {
    /// Sections in document order
    pub const ALL: [Section; 4] = [
        Section::Customers,
        Section::Orders,
        Section::Files,
        Section::Connections,
    ];

    /// Property name in the document
    pub fn name(self) -> &'static str {
        match self {
            Section::Customers => "Customers",
            Section::Orders => "Orders",
            Section::Files => "Files",
            Section::Connections => "ConnectionDeviceDatas",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }

    /// Import progress while replaying this section
    fn start_checkpoint(self) -> f32 {
        match self {
            Section::Customers => 10.0,
            Section::Orders => 40.0,
            Section::Files => 70.0,
            Section::Connections => 90.0,
        }
    }

    /// Import progress once this section is closed
    fn end_checkpoint(self) -> f32 {
        match self {
            Section::Customers => 33.0,
            Section::Orders => 66.0,
            Section::Files => 85.0,
            Section::Connections => 100.0,
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Forwards progress values, never letting them go backwards
struct Progress<'a> {
    callback: ProgressFn<'a>,
    last: f32,
}

impl<'a> Progress<'a> {
    fn new(callback: ProgressFn<'a>) -> Self {
        Self { callback, last: 0.0 }
    }

    fn report(&mut self, value: f32) {
        let value = value.clamp(0.0, 100.0).max(self.last);
        self.last = value;
        if let Some(callback) = self.callback.as_mut() {
            callback(value);
        }
    }
}

/// Records written by an export, per kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub customers: u64,
    pub orders: u64,
    pub files: u64,
    pub connections: u64,
}

impl ExportSummary {
    pub fn total(&self) -> u64 {
        self.customers + self.orders + self.files + self.connections
    }
}

/// Records replayed by an import, per kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub customers: u64,
    pub orders: u64,
    pub files: u64,
    pub connections: u64,
}

impl ImportSummary {
    pub fn total(&self) -> u64 {
        self.customers + self.orders + self.files + self.connections
    }
}
