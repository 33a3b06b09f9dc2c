pub mod point_construction;
