pub mod conversions;

pub mod overlay {
    tonic::include_proto!("overlay");
}
