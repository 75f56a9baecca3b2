pub mod broadcast;
pub mod chord;
pub mod chord_data;
pub mod follower;
pub mod master;
pub mod namedir;
pub mod registry;
pub mod request_handler;
