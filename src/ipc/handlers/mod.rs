pub mod attendance;
pub mod backup;
pub mod classes;
pub mod core;
pub mod exams;
pub mod scores;
pub mod settings;
pub mod sheets;
pub mod stats;
pub mod students;
