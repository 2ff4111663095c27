pub mod accrue_points;
