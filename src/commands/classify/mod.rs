mod batch;
mod report;
mod run;
mod stats_merge;
mod stats_parse;
mod stats_render;
mod stats_rows;
#[cfg(test)]
mod tests;

pub use run::run;

use batch::*;
use report::*;
use stats_merge::*;
