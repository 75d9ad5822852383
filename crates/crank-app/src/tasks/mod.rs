pub mod connection;
pub mod housekeeping;
pub mod imu;
pub mod low_speed;
pub mod power;
pub mod side;
