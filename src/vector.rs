use crate::types::VectorId;
use rand::Rng;
use std::sync::Arc;

/// A vector with an id and floating-point payload.
/// The payload is stored in an Arc for cheap cloning between the canonical
/// store and the active backend.
#[derive(Clone, Debug)]
pub struct Vector {
    pub id: VectorId,
    pub data: Arc<[f32]>,
}

impl Vector {
    /// Create a new vector with the given id and payload.
    pub fn new(id: VectorId, data: Vec<f32>) -> Self {
        Self {
            id,
            data: data.into(),
        }
    }

    /// Create a random vector with values uniformly distributed in [-1.0, 1.0].
    pub fn random(id: u64, dim: usize) -> Self {
        let mut rng = rand::thread_rng();
        let data: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
        Self::new(VectorId(id), data)
    }

    /// Return the dimensionality of this vector.
    pub fn dim(&self) -> usize {
        self.data.len()
    }
}
