pub mod boundary;
pub mod emit;
pub mod outline_walk;
pub mod payroll;
pub mod run;
pub mod section;
#[cfg(test)]
mod tests;

pub use run::{run, sections_for_inspection};
