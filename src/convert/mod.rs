//! Pixel format conversion between the sensor's packed color and the
//! published planar format

pub mod layout;
pub mod yuv;

pub use layout::{confidence_len, packed_len, xyz_len, I420Layout, PACKED_BPP};
pub use yuv::{
    packed_to_planar, packed_to_planar_into, planar_to_packed, planar_to_packed_into,
    yuyv_to_packed_into,
};
