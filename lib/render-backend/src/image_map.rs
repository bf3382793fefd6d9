use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::vulkan::image::DeviceImage;

/// The image id registry. Staged client images install here; sampling
/// Scinths resolve their bindings against it.
#[derive(Debug, Default)]
pub struct ImageMap {
    images: Mutex<HashMap<i32, Arc<DeviceImage>>>,
    empty_image: Mutex<Option<Arc<DeviceImage>>>,
}

impl ImageMap {
    pub fn new() -> ImageMap {
        Default::default()
    }

    /// Overwrites any existing image associated with `image_id`.
    pub fn add_image(&self, image_id: i32, image: Arc<DeviceImage>) {
        self.images.lock().insert(image_id, image);
    }

    pub fn get_image(&self, image_id: i32) -> Option<Arc<DeviceImage>> {
        self.images.lock().get(&image_id).cloned()
    }

    pub fn remove_image(&self, image_id: i32) {
        self.images.lock().remove(&image_id);
    }

    /// A 1x1 transparent black image bound wherever a requested image id is
    /// missing. Installed once staging completes at startup.
    pub fn empty_image(&self) -> Option<Arc<DeviceImage>> {
        self.empty_image.lock().clone()
    }

    pub fn set_empty_image(&self, image: Arc<DeviceImage>) {
        *self.empty_image.lock() = Some(image);
    }
}
