use std::sync::Arc;

use thiserror::Error;

use crate::abstract_vgen::{AbstractVGen, Rate};
use crate::sampler_config::SamplerConfig;

/// One bound input on a VGen instance.
#[derive(Debug, Clone, PartialEq)]
pub enum VGenInput {
    Constant1(f32),
    Constant2([f32; 2]),
    Constant3([f32; 3]),
    Constant4([f32; 4]),
    /// Index into the ScinthDef's parameter list.
    Parameter(usize),
    /// Output of an earlier VGen in the same ScinthDef.
    VGenOutput {
        vgen_index: usize,
        output_index: usize,
        dimension: u32,
    },
}

impl VGenInput {
    pub fn dimension(&self) -> u32 {
        match self {
            VGenInput::Constant1(_) => 1,
            VGenInput::Constant2(_) => 2,
            VGenInput::Constant3(_) => 3,
            VGenInput::Constant4(_) => 4,
            VGenInput::Parameter(_) => 1,
            VGenInput::VGenOutput { dimension, .. } => *dimension,
        }
    }
}

/// Where a sampling VGen finds its image: a fixed image id, or a ScinthDef
/// parameter holding the id.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ImageSource {
    Constant(i32),
    Parameter(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerBinding {
    pub image: ImageSource,
    pub config: SamplerConfig,
}

#[derive(Debug, Error)]
pub enum VGenError {
    #[error("vgen {name} expects {expected} inputs, got {actual}")]
    InputArity {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("vgen {name} expects {expected} outputs, got {actual}")]
    OutputArity {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("vgen {name} does not support the selected rate")]
    UnsupportedRate { name: String },
    #[error("sampler vgen {name} has no sampler configuration")]
    MissingSampler { name: String },
    #[error("non-sampler vgen {name} has a sampler configuration")]
    UnexpectedSampler { name: String },
    #[error("vgen {name} dimensions match no supported variant")]
    NoDimensionVariant { name: String },
}

/// A single node in the signal flow graph of a ScinthDef: an
/// [`AbstractVGen`] template plus a selected rate and bound inputs.
#[derive(Debug, Clone)]
pub struct VGen {
    template: Arc<AbstractVGen>,
    rate: Rate,
    inputs: Vec<VGenInput>,
    output_dimensions: Vec<u32>,
    sampler: Option<SamplerBinding>,
}

impl VGen {
    pub fn new(template: Arc<AbstractVGen>, rate: Rate) -> VGen {
        VGen {
            template,
            rate,
            inputs: Vec::new(),
            output_dimensions: Vec::new(),
            sampler: None,
        }
    }

    pub fn add_input(&mut self, input: VGenInput) {
        self.inputs.push(input);
    }

    pub fn add_output(&mut self, dimension: u32) {
        self.output_dimensions.push(dimension);
    }

    /// Ignored on non-sampling templates; `validate` flags the mismatch.
    pub fn set_sampler(&mut self, sampler: SamplerBinding) {
        self.sampler = Some(sampler);
    }

    /// Check this instance against its template: arity, rate support,
    /// sampler presence, and that the bound dimensions match one of the
    /// template's supported variants.
    pub fn validate(&self) -> Result<(), VGenError> {
        let name = self.template.name().to_string();
        if self.inputs.len() != self.template.inputs().len() {
            return Err(VGenError::InputArity {
                name,
                expected: self.template.inputs().len(),
                actual: self.inputs.len(),
            });
        }
        if self.output_dimensions.len() != self.template.outputs().len() {
            return Err(VGenError::OutputArity {
                name,
                expected: self.template.outputs().len(),
                actual: self.output_dimensions.len(),
            });
        }
        if !self.template.rates().contains(self.rate.as_flag()) {
            return Err(VGenError::UnsupportedRate { name });
        }
        if self.template.is_sampler() && self.sampler.is_none() {
            return Err(VGenError::MissingSampler { name });
        }
        if !self.template.is_sampler() && self.sampler.is_some() {
            return Err(VGenError::UnexpectedSampler { name });
        }
        if self.matching_dimension_variant().is_none() {
            return Err(VGenError::NoDimensionVariant { name });
        }
        Ok(())
    }

    /// Find the index of the template dimension variant matching this
    /// instance's input and output dimensions.
    pub fn matching_dimension_variant(&self) -> Option<usize> {
        let input_dims: Vec<u32> = self.inputs.iter().map(|input| input.dimension()).collect();
        (0..self.template.input_dimensions().len()).find(|&variant| {
            self.template.input_dimensions()[variant] == input_dims
                && self.template.output_dimensions()[variant] == self.output_dimensions
        })
    }

    pub fn template(&self) -> &Arc<AbstractVGen> {
        &self.template
    }

    pub fn rate(&self) -> Rate {
        self.rate
    }

    pub fn inputs(&self) -> &[VGenInput] {
        &self.inputs
    }

    pub fn number_of_outputs(&self) -> usize {
        self.output_dimensions.len()
    }

    pub fn output_dimension(&self, index: usize) -> u32 {
        self.output_dimensions[index]
    }

    pub fn output_dimensions(&self) -> &[u32] {
        &self.output_dimensions
    }

    pub fn sampler(&self) -> Option<&SamplerBinding> {
        self.sampler.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstract_vgen::Rates;

    fn template() -> Arc<AbstractVGen> {
        Arc::new(
            AbstractVGen::new(
                "Scale",
                Rates::SHAPE | Rates::PIXEL,
                false,
                vec!["a".to_string()],
                vec!["out".to_string()],
                vec![vec![1], vec![2]],
                vec![vec![1], vec![2]],
                "@out = 2.0 * @a;",
            )
            .unwrap(),
        )
    }

    #[test]
    fn validates_matching_variant() {
        let mut vgen = VGen::new(template(), Rate::Pixel);
        vgen.add_input(VGenInput::Constant2([0.5, 0.5]));
        vgen.add_output(2);
        assert!(vgen.validate().is_ok());
        assert_eq!(Some(1), vgen.matching_dimension_variant());
    }

    #[test]
    fn rejects_dimension_mismatch() {
        let mut vgen = VGen::new(template(), Rate::Pixel);
        vgen.add_input(VGenInput::Constant2([0.5, 0.5]));
        vgen.add_output(1);
        assert!(matches!(
            vgen.validate(),
            Err(VGenError::NoDimensionVariant { .. })
        ));
    }

    #[test]
    fn rejects_unsupported_rate() {
        let mut vgen = VGen::new(template(), Rate::Frame);
        vgen.add_input(VGenInput::Constant1(1.0));
        vgen.add_output(1);
        assert!(matches!(
            vgen.validate(),
            Err(VGenError::UnsupportedRate { .. })
        ));
    }

    #[test]
    fn rejects_arity_mismatch() {
        let mut vgen = VGen::new(template(), Rate::Pixel);
        vgen.add_output(1);
        assert!(matches!(vgen.validate(), Err(VGenError::InputArity { .. })));
    }

    #[test]
    fn sampler_only_on_sampler_templates() {
        let mut vgen = VGen::new(template(), Rate::Pixel);
        vgen.add_input(VGenInput::Constant1(1.0));
        vgen.add_output(1);
        vgen.set_sampler(SamplerBinding {
            image: ImageSource::Constant(1),
            config: SamplerConfig::new(),
        });
        assert!(matches!(
            vgen.validate(),
            Err(VGenError::UnexpectedSampler { .. })
        ));
    }
}
