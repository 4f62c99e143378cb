mod tracker;

pub use tracker::DraftTracker;
