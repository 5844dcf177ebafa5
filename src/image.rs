use serde::{Deserialize, Serialize};

/// Id of a loaded image, assigned in load order starting from 0
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ImageId(pub u32);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageInfo {
    pub name: String,
    pub low_address: u64,
    /// unloaded images keep their id
    pub loaded: bool,
}

/// Append-only registry of code images
#[derive(Debug, Default)]
pub struct ImageRegistry {
    images: Vec<ImageInfo>,
}

impl ImageRegistry {
    pub fn add(&mut self, name: &str, low_address: u64) -> ImageId {
        let id = ImageId(self.images.len() as u32);
        self.images.push(ImageInfo {
            name: name.to_string(),
            low_address,
            loaded: true,
        });
        id
    }

    pub fn mark_unloaded(&mut self, id: ImageId) {
        match self.images.get_mut(id.0 as usize) {
            Some(info) => info.loaded = false,
            None => panic!("unload of unknown image {:?}", id),
        }
    }

    pub fn get(&self, id: ImageId) -> Option<&ImageInfo> {
        self.images.get(id.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}
