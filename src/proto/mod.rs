pub mod coordinator {
    pub mod v1 {
        include!("coordinator.v1.rs");
    }
}
