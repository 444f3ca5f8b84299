pub mod catalog;
pub mod classes;
pub mod core;
pub mod dashboard;
pub mod letters;
pub mod session;
pub mod students;
pub mod violations;
