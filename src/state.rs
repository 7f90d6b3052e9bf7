//! Shared state for the routes of one resource.

use crate::resource::EntityResource;
use std::sync::Arc;

#[derive(Clone)]
pub struct ResourceState {
    pub resource: Arc<EntityResource>,
}

impl ResourceState {
    pub fn new(resource: Arc<EntityResource>) -> Self {
        ResourceState { resource }
    }
}
