//! Named parameter sets bridging the crate to the candle runtime
//!
//! A [`ParameterSet`] is the narrow boundary between trainbox and the tensor
//! runtime: a mapping from stable parameter names to candle [`Var`] handles.
//! The handles alias the training loop's own storage, so in-place writes
//! performed through a set (e.g. by [`crate::ema::ShadowAverager::apply`])
//! are observed by the optimizer's next step.

use std::collections::HashMap;

use candle_core::Var;
use candle_nn::VarMap;

/// Mapping from parameter name to a live candle variable
///
/// Keys are unique; insertion order is irrelevant. The set never resizes or
/// reshapes the underlying tensors.
#[derive(Debug, Clone, Default)]
pub struct ParameterSet {
    params: HashMap<String, Var>,
}

impl ParameterSet {
    /// Create an empty parameter set
    pub fn new() -> Self {
        Self {
            params: HashMap::new(),
        }
    }

    /// Build a parameter set aliasing every variable in a [`VarMap`]
    ///
    /// The cloned [`Var`] handles share storage with the map, so writes
    /// through the returned set are visible to the model that owns the map.
    pub fn from_varmap(varmap: &VarMap) -> Self {
        let data = varmap.data().lock().unwrap();
        let params = data
            .iter()
            .map(|(name, var)| (name.clone(), var.clone()))
            .collect();
        Self { params }
    }

    /// Insert a named variable, replacing any previous entry with that name
    pub fn insert(&mut self, name: impl Into<String>, var: Var) {
        self.params.insert(name.into(), var);
    }

    /// Get a variable by name
    pub fn get(&self, name: &str) -> Option<&Var> {
        self.params.get(name)
    }

    /// Whether the set contains the given name
    pub fn contains(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    /// List all parameter names
    pub fn names(&self) -> Vec<&String> {
        self.params.keys().collect()
    }

    /// Iterate over (name, variable) pairs
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Var)> {
        self.params.iter()
    }

    /// Number of parameters in the set
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Total number of scalar elements across all parameters
    pub fn total_elements(&self) -> usize {
        self.params.values().map(|v| v.elem_count()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Tensor};

    fn var(data: &[f32]) -> Var {
        let t = Tensor::from_vec(data.to_vec(), data.len(), &Device::Cpu).unwrap();
        Var::from_tensor(&t).unwrap()
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut set = ParameterSet::new();
        assert!(set.is_empty());

        set.insert("w", var(&[1.0, 2.0]));
        set.insert("b", var(&[0.5]));

        assert_eq!(set.len(), 2);
        assert!(set.contains("w"));
        assert!(!set.contains("missing"));
        assert_eq!(set.get("b").unwrap().elem_count(), 1);
        assert_eq!(set.total_elements(), 3);
    }

    #[test]
    fn test_from_varmap_aliases_storage() {
        let varmap = VarMap::new();
        let v = varmap
            .get(2, "w", candle_nn::init::ZERO, candle_core::DType::F32, &Device::Cpu)
            .unwrap();
        drop(v);

        let set = ParameterSet::from_varmap(&varmap);
        assert_eq!(set.len(), 1);

        // Writing through the set must be visible through the map.
        let replacement = Tensor::from_vec(vec![3.0f32, 4.0], 2, &Device::Cpu).unwrap();
        set.get("w").unwrap().set(&replacement).unwrap();

        let via_map = varmap.data().lock().unwrap().get("w").unwrap().clone();
        let values = via_map.as_tensor().to_vec1::<f32>().unwrap();
        assert_eq!(values, vec![3.0, 4.0]);
    }
}
