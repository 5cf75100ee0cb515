pub mod algorithms;
pub use algorithms::{
    EARTH_RADIUS_M, METERS_PER_DEGREE, haversine_distance, meters_to_radians,
    signed_longitude_delta,
};

pub mod bounds;
pub use bounds::{SearchCircle, min_distance_to_box};
