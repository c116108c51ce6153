pub mod personas;
pub mod run;
pub mod status;
