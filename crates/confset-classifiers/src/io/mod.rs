pub mod labeled_csv;

pub use labeled_csv::{read_labeled_csv, LabeledData};
