pub mod concepts;
pub mod forgetting_curve;
pub mod mastery;
pub mod retention;
pub mod sm2;
pub mod streak;
