mod common;

mod assignment;
mod automation;
mod duplicates;
