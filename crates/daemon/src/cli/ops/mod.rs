pub mod ls;
pub mod probe;
pub mod run;
pub mod version;

pub use ls::Ls;
pub use probe::Probe;
pub use run::Run;
pub use version::Version;
