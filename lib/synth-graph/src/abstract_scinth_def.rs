use std::collections::{BTreeSet, HashMap, HashSet};

use thiserror::Error;

use crate::abstract_vgen::{Rate, TemplateError};
use crate::intrinsic::Intrinsic;
use crate::manifest::{ElementType, Manifest, ManifestBuilder};
use crate::parameter::Parameter;
use crate::shape::Shape;
use crate::vgen::{ImageSource, VGen, VGenError, VGenInput};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("scinthdef has no vgens")]
    NoInstances,
    #[error("vgen {consumer} references vgen {producer} which is not earlier in the graph")]
    ForwardReference { consumer: usize, producer: usize },
    #[error("vgen {consumer} references output {output} of vgen {producer} which has {available} outputs")]
    OutputIndexRange {
        consumer: usize,
        producer: usize,
        output: usize,
        available: usize,
    },
    #[error("vgen {consumer} expects dimension {expected} from vgen {producer} output {output}, which has dimension {actual}")]
    DimensionMismatch {
        consumer: usize,
        producer: usize,
        output: usize,
        expected: u32,
        actual: u32,
    },
    #[error("vgen {consumer} at frame or shape rate consumes pixel-rate vgen {producer}")]
    RateOrdering { consumer: usize, producer: usize },
    #[error("vgen {vgen} references parameter index {index} but the def has {available} parameters")]
    ParameterIndexRange {
        vgen: usize,
        index: usize,
        available: usize,
    },
    #[error("vgen {vgen} at frame or shape rate takes a parameter input")]
    ParameterInVertexStage { vgen: usize },
    #[error("sampler vgen {vgen} must run at pixel rate")]
    SamplerNotPixelRate { vgen: usize },
    #[error("duplicate parameter name {name}")]
    DuplicateParameterName { name: String },
    #[error("parameter name {name} is not a valid identifier")]
    InvalidParameterName { name: String },
    #[error("final vgen must run at pixel rate")]
    FinalOutput,
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    VGen(#[from] VGenError),
}

/// One combined-image-sampler binding in the descriptor set layout a
/// ScinthDef derives from this def.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageBinding {
    pub binding: u32,
    pub sampler_key: u32,
    pub source: ImageSource,
}

#[derive(Debug, Clone)]
struct Varying {
    name: String,
    type_name: &'static str,
}

/// A topologically sorted signal graph of VGens, built into the shaders,
/// manifests, and image binding requirements that graphical ScinthDef
/// instances render with.
///
/// Construction runs the ordered phases: validate and choose dimension
/// variants, allocate names, pack manifests, then synthesize the vertex and
/// fragment shaders. A failure in any phase rejects the whole def.
#[derive(Debug)]
pub struct AbstractScinthDef {
    name: String,
    parameters: Vec<Parameter>,
    instances: Vec<VGen>,
    shape: Box<dyn Shape>,

    fixed_images: BTreeSet<(u32, i32)>,
    parameterized_images: BTreeSet<(u32, usize)>,

    prefix: String,
    vertex_position_element_name: String,
    fragment_output_name: String,
    parameters_struct_name: String,
    uniform_instance_name: String,
    parameter_indices: HashMap<String, usize>,
    intrinsics: HashSet<Intrinsic>,
    outputs: Vec<Vec<String>>,
    varyings: Vec<Varying>,
    vertex_shader: String,
    fragment_shader: String,
    vertex_manifest: Manifest,
    uniform_manifest: Manifest,
}

fn glsl_float(value: f32) -> String {
    format!("{:?}", value)
}

fn glsl_type_for_dimension(dimension: u32) -> &'static str {
    match dimension {
        1 => "float",
        2 => "vec2",
        3 => "vec3",
        _ => "vec4",
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn sanitize_prefix(name: &str) -> String {
    let mut prefix: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if prefix.chars().next().map_or(true, |c| c.is_ascii_digit()) {
        prefix.insert(0, '_');
    }
    prefix
}

impl AbstractScinthDef {
    pub fn build(
        name: &str,
        parameters: Vec<Parameter>,
        instances: Vec<VGen>,
        shape: Box<dyn Shape>,
    ) -> Result<AbstractScinthDef, BuildError> {
        let mut def = AbstractScinthDef {
            name: name.to_string(),
            parameters,
            instances,
            shape,
            fixed_images: BTreeSet::new(),
            parameterized_images: BTreeSet::new(),
            prefix: String::new(),
            vertex_position_element_name: String::new(),
            fragment_output_name: String::new(),
            parameters_struct_name: String::new(),
            uniform_instance_name: String::new(),
            parameter_indices: HashMap::new(),
            intrinsics: HashSet::new(),
            outputs: Vec::new(),
            varyings: Vec::new(),
            vertex_shader: String::new(),
            fragment_shader: String::new(),
            vertex_manifest: Manifest::default(),
            uniform_manifest: Manifest::default(),
        };
        def.build_inputs()?;
        def.build_names()?;
        def.build_manifests()?;
        def.build_vertex_shader()?;
        def.build_fragment_shader()?;
        Ok(def)
    }

    fn build_inputs(&mut self) -> Result<(), BuildError> {
        if self.instances.is_empty() {
            return Err(BuildError::NoInstances);
        }
        for (i, vgen) in self.instances.iter().enumerate() {
            vgen.validate()?;
            for input in vgen.inputs() {
                match input {
                    VGenInput::VGenOutput {
                        vgen_index,
                        output_index,
                        dimension,
                    } => {
                        if *vgen_index >= i {
                            return Err(BuildError::ForwardReference {
                                consumer: i,
                                producer: *vgen_index,
                            });
                        }
                        let producer = &self.instances[*vgen_index];
                        if *output_index >= producer.number_of_outputs() {
                            return Err(BuildError::OutputIndexRange {
                                consumer: i,
                                producer: *vgen_index,
                                output: *output_index,
                                available: producer.number_of_outputs(),
                            });
                        }
                        let actual = producer.output_dimension(*output_index);
                        if actual != *dimension {
                            return Err(BuildError::DimensionMismatch {
                                consumer: i,
                                producer: *vgen_index,
                                output: *output_index,
                                expected: *dimension,
                                actual,
                            });
                        }
                        if producer.rate() == Rate::Pixel && vgen.rate() != Rate::Pixel {
                            return Err(BuildError::RateOrdering {
                                consumer: i,
                                producer: *vgen_index,
                            });
                        }
                    }
                    VGenInput::Parameter(index) => {
                        if *index >= self.parameters.len() {
                            return Err(BuildError::ParameterIndexRange {
                                vgen: i,
                                index: *index,
                                available: self.parameters.len(),
                            });
                        }
                        if vgen.rate() != Rate::Pixel {
                            return Err(BuildError::ParameterInVertexStage { vgen: i });
                        }
                    }
                    _ => {}
                }
            }
            if let Some(sampler) = vgen.sampler() {
                if vgen.rate() != Rate::Pixel {
                    return Err(BuildError::SamplerNotPixelRate { vgen: i });
                }
                if let ImageSource::Parameter(index) = sampler.image {
                    if index >= self.parameters.len() {
                        return Err(BuildError::ParameterIndexRange {
                            vgen: i,
                            index,
                            available: self.parameters.len(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn build_names(&mut self) -> Result<(), BuildError> {
        self.prefix = sanitize_prefix(&self.name);
        self.vertex_position_element_name = format!("{}_position", self.prefix);
        self.fragment_output_name = format!("{}_fragColor", self.prefix);
        self.parameters_struct_name = format!("{}_parameters", self.prefix);
        self.uniform_instance_name = format!("{}_ubo", self.prefix);

        for (index, parameter) in self.parameters.iter().enumerate() {
            if !is_identifier(parameter.name()) {
                return Err(BuildError::InvalidParameterName {
                    name: parameter.name().to_string(),
                });
            }
            if self
                .parameter_indices
                .insert(parameter.name().to_string(), index)
                .is_some()
            {
                return Err(BuildError::DuplicateParameterName {
                    name: parameter.name().to_string(),
                });
            }
        }

        for (i, vgen) in self.instances.iter().enumerate() {
            let mut names = Vec::with_capacity(vgen.number_of_outputs());
            for j in 0..vgen.number_of_outputs() {
                names.push(format!("{}_out_{}_{}", self.prefix, i, j));
            }
            self.outputs.push(names);
            self.intrinsics
                .extend(vgen.template().intrinsics().iter().copied());
            if let Some(sampler) = vgen.sampler() {
                match sampler.image {
                    ImageSource::Constant(image_id) => {
                        self.fixed_images.insert((sampler.config.key(), image_id));
                    }
                    ImageSource::Parameter(index) => {
                        self.parameterized_images
                            .insert((sampler.config.key(), index));
                    }
                }
            }
        }
        Ok(())
    }

    fn build_manifests(&mut self) -> Result<(), BuildError> {
        let mut vertex = ManifestBuilder::new();
        vertex
            .add(
                &self.vertex_position_element_name.clone(),
                self.shape.element_type(),
                None,
            )
            .expect("position element is the first manifest entry");
        if self.intrinsics.contains(&Intrinsic::NormPos) {
            vertex
                .add(
                    &format!("{}_normPos", self.prefix),
                    ElementType::Vec2,
                    Some(Intrinsic::NormPos),
                )
                .map_err(|_| BuildError::DuplicateParameterName {
                    name: format!("{}_normPos", self.prefix),
                })?;
        }
        if self.intrinsics.contains(&Intrinsic::TexPos) {
            vertex
                .add(
                    &format!("{}_texPos", self.prefix),
                    ElementType::Vec2,
                    Some(Intrinsic::TexPos),
                )
                .map_err(|_| BuildError::DuplicateParameterName {
                    name: format!("{}_texPos", self.prefix),
                })?;
        }
        self.vertex_manifest = vertex.pack();

        let mut uniform = ManifestBuilder::new();
        if self.intrinsics.contains(&Intrinsic::Time) {
            uniform
                .add(
                    &format!("{}_time", self.prefix),
                    ElementType::Float,
                    Some(Intrinsic::Time),
                )
                .expect("time element is the only uniform manifest entry");
        }
        self.uniform_manifest = uniform.pack();

        // Varyings carry every non-position vertex attribute plus the
        // outputs of every frame- and shape-rate VGen into the fragment
        // stage. Locations are assigned in declaration order.
        for index in 0..self.vertex_manifest.number_of_elements() {
            let name = self.vertex_manifest.name_for_element(index);
            if name == self.vertex_position_element_name {
                continue;
            }
            self.varyings.push(Varying {
                name: name.to_string(),
                type_name: self.vertex_manifest.type_name_for_element(index),
            });
        }
        for (i, vgen) in self.instances.iter().enumerate() {
            if vgen.rate() == Rate::Pixel {
                continue;
            }
            for j in 0..vgen.number_of_outputs() {
                self.varyings.push(Varying {
                    name: self.outputs[i][j].clone(),
                    type_name: glsl_type_for_dimension(vgen.output_dimension(j)),
                });
            }
        }
        Ok(())
    }

    fn uniform_block_source(&self) -> String {
        let mut block = format!(
            "layout(std140, set = 0, binding = 0) uniform {}_Uniforms {{\n",
            self.prefix
        );
        for index in 0..self.uniform_manifest.number_of_elements() {
            block.push_str(&format!(
                "    {} {};\n",
                self.uniform_manifest.type_name_for_element(index),
                self.uniform_manifest.name_for_element(index)
            ));
        }
        block.push_str(&format!("}} {};\n", self.uniform_instance_name));
        block
    }

    fn intrinsic_substitutions(&self) -> HashMap<Intrinsic, String> {
        let mut substitutions = HashMap::new();
        if self.intrinsics.contains(&Intrinsic::Time) {
            substitutions.insert(
                Intrinsic::Time,
                format!("{}.{}_time", self.uniform_instance_name, self.prefix),
            );
        }
        if self.intrinsics.contains(&Intrinsic::NormPos) {
            substitutions.insert(Intrinsic::NormPos, format!("{}_normPos", self.prefix));
        }
        if self.intrinsics.contains(&Intrinsic::TexPos) {
            substitutions.insert(Intrinsic::TexPos, format!("{}_texPos", self.prefix));
        }
        substitutions.insert(Intrinsic::Pi, glsl_float(std::f32::consts::PI));
        substitutions
    }

    fn input_substitution(&self, input: &VGenInput) -> String {
        match input {
            VGenInput::Constant1(v) => glsl_float(*v),
            VGenInput::Constant2(v) => {
                format!("vec2({}, {})", glsl_float(v[0]), glsl_float(v[1]))
            }
            VGenInput::Constant3(v) => format!(
                "vec3({}, {}, {})",
                glsl_float(v[0]),
                glsl_float(v[1]),
                glsl_float(v[2])
            ),
            VGenInput::Constant4(v) => format!(
                "vec4({}, {}, {}, {})",
                glsl_float(v[0]),
                glsl_float(v[1]),
                glsl_float(v[2]),
                glsl_float(v[3])
            ),
            VGenInput::Parameter(index) => format!(
                "{}.{}",
                self.parameters_struct_name,
                self.parameters[*index].name()
            ),
            VGenInput::VGenOutput {
                vgen_index,
                output_index,
                ..
            } => self.outputs[*vgen_index][*output_index].clone(),
        }
    }

    fn sampler_uniform_name(&self, sampler_key: u32, source: ImageSource) -> String {
        match source {
            ImageSource::Constant(image_id) => {
                let id = if image_id < 0 {
                    format!("n{}", -(image_id as i64))
                } else {
                    format!("{}", image_id)
                };
                format!("{}_sampler_{:08x}_img_{}", self.prefix, sampler_key, id)
            }
            ImageSource::Parameter(index) => {
                format!("{}_sampler_{:08x}_param_{}", self.prefix, sampler_key, index)
            }
        }
    }

    /// The combined-image-sampler bindings in descriptor set order: fixed
    /// images first, then parameterized, following binding 0 when the
    /// uniform manifest is non-empty.
    pub fn image_bindings(&self) -> Vec<ImageBinding> {
        let mut binding = if self.uniform_manifest.number_of_elements() > 0 {
            1
        } else {
            0
        };
        let mut bindings = Vec::new();
        for (sampler_key, image_id) in &self.fixed_images {
            bindings.push(ImageBinding {
                binding,
                sampler_key: *sampler_key,
                source: ImageSource::Constant(*image_id),
            });
            binding += 1;
        }
        for (sampler_key, index) in &self.parameterized_images {
            bindings.push(ImageBinding {
                binding,
                sampler_key: *sampler_key,
                source: ImageSource::Parameter(*index),
            });
            binding += 1;
        }
        bindings
    }

    fn build_vertex_shader(&mut self) -> Result<(), BuildError> {
        let mut shader = String::from("#version 450\n\n");
        for index in 0..self.vertex_manifest.number_of_elements() {
            shader.push_str(&format!(
                "layout(location = {}) in {} in_{};\n",
                index,
                self.vertex_manifest.type_name_for_element(index),
                self.vertex_manifest.name_for_element(index)
            ));
        }
        if self.uniform_manifest.number_of_elements() > 0 {
            shader.push('\n');
            shader.push_str(&self.uniform_block_source());
        }
        shader.push('\n');
        for (location, varying) in self.varyings.iter().enumerate() {
            shader.push_str(&format!(
                "layout(location = {}) out {} {};\n",
                location, varying.type_name, varying.name
            ));
        }

        let declared: HashSet<String> = self
            .varyings
            .iter()
            .map(|varying| varying.name.clone())
            .collect();
        let intrinsics = self.intrinsic_substitutions();

        shader.push_str("\nvoid main() {\n");
        for index in 0..self.vertex_manifest.number_of_elements() {
            let name = self.vertex_manifest.name_for_element(index);
            if name == self.vertex_position_element_name {
                continue;
            }
            shader.push_str(&format!("    {} = in_{};\n", name, name));
        }
        for (i, vgen) in self.instances.iter().enumerate() {
            if vgen.rate() == Rate::Pixel {
                continue;
            }
            let inputs: Vec<String> = vgen
                .inputs()
                .iter()
                .map(|input| self.input_substitution(input))
                .collect();
            let fragment = vgen.template().parameterize(
                &inputs,
                &intrinsics,
                &self.outputs[i],
                vgen.output_dimensions(),
                &declared,
            )?;
            shader.push_str("    ");
            shader.push_str(&fragment);
            shader.push('\n');
        }
        let position = format!("in_{}", self.vertex_position_element_name);
        match self.shape.element_type() {
            ElementType::Vec2 => shader.push_str(&format!(
                "    gl_Position = vec4({}, 0.0, 1.0);\n",
                position
            )),
            ElementType::Vec3 => {
                shader.push_str(&format!("    gl_Position = vec4({}, 1.0);\n", position))
            }
            _ => shader.push_str(&format!("    gl_Position = {};\n", position)),
        }
        shader.push_str("}\n");
        self.vertex_shader = shader;
        Ok(())
    }

    fn build_fragment_shader(&mut self) -> Result<(), BuildError> {
        let last = self
            .instances
            .last()
            .expect("build_inputs rejects empty defs");
        if last.rate() != Rate::Pixel || last.number_of_outputs() == 0 {
            return Err(BuildError::FinalOutput);
        }
        let last_dimension = last.output_dimension(0);

        let mut shader = String::from("#version 450\n\n");
        for (location, varying) in self.varyings.iter().enumerate() {
            shader.push_str(&format!(
                "layout(location = {}) in {} {};\n",
                location, varying.type_name, varying.name
            ));
        }
        if self.uniform_manifest.number_of_elements() > 0 {
            shader.push('\n');
            shader.push_str(&self.uniform_block_source());
        }
        for image_binding in self.image_bindings() {
            shader.push_str(&format!(
                "layout(set = 0, binding = {}) uniform sampler2D {};\n",
                image_binding.binding,
                self.sampler_uniform_name(image_binding.sampler_key, image_binding.source)
            ));
        }
        if !self.parameters.is_empty() {
            shader.push('\n');
            shader.push_str(&format!(
                "layout(push_constant) uniform {}_Parameters {{\n",
                self.prefix
            ));
            for parameter in &self.parameters {
                shader.push_str(&format!("    float {};\n", parameter.name()));
            }
            shader.push_str(&format!("}} {};\n", self.parameters_struct_name));
        }
        shader.push('\n');
        shader.push_str(&format!(
            "layout(location = 0) out vec4 {};\n",
            self.fragment_output_name
        ));

        let declared: HashSet<String> = self
            .varyings
            .iter()
            .map(|varying| varying.name.clone())
            .collect();
        let mut intrinsics = self.intrinsic_substitutions();

        shader.push_str("\nvoid main() {\n");
        for (i, vgen) in self.instances.iter().enumerate() {
            if vgen.rate() != Rate::Pixel {
                continue;
            }
            if let Some(sampler) = vgen.sampler() {
                intrinsics.insert(
                    Intrinsic::Sampler,
                    self.sampler_uniform_name(sampler.config.key(), sampler.image),
                );
            } else {
                intrinsics.remove(&Intrinsic::Sampler);
            }
            let inputs: Vec<String> = vgen
                .inputs()
                .iter()
                .map(|input| self.input_substitution(input))
                .collect();
            let fragment = vgen.template().parameterize(
                &inputs,
                &intrinsics,
                &self.outputs[i],
                vgen.output_dimensions(),
                &declared,
            )?;
            shader.push_str("    ");
            shader.push_str(&fragment);
            shader.push('\n');
        }
        // Final emission, widened to the four-component fragment output when
        // the last VGen produces fewer channels.
        let emission = &self.outputs[self.instances.len() - 1][0];
        let widened = match last_dimension {
            1 => format!("vec4({e}, {e}, {e}, 1.0)", e = emission),
            2 => format!("vec4({}, 0.0, 1.0)", emission),
            3 => format!("vec4({}, 1.0)", emission),
            _ => emission.clone(),
        };
        shader.push_str(&format!(
            "    {} = {};\n",
            self.fragment_output_name, widened
        ));
        shader.push_str("}\n");
        self.fragment_shader = shader;
        Ok(())
    }

    /// The standardized symbol for the output of the VGen at `vgen_index`.
    pub fn name_for_vgen_output(&self, vgen_index: usize, output_index: usize) -> &str {
        &self.outputs[vgen_index][output_index]
    }

    pub fn index_for_parameter_name(&self, name: &str) -> Option<usize> {
        self.parameter_indices.get(name).copied()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn instances(&self) -> &[VGen] {
        &self.instances
    }

    pub fn shape(&self) -> &dyn Shape {
        self.shape.as_ref()
    }

    pub fn fixed_images(&self) -> &BTreeSet<(u32, i32)> {
        &self.fixed_images
    }

    pub fn parameterized_images(&self) -> &BTreeSet<(u32, usize)> {
        &self.parameterized_images
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn vertex_position_element_name(&self) -> &str {
        &self.vertex_position_element_name
    }

    pub fn parameters_struct_name(&self) -> &str {
        &self.parameters_struct_name
    }

    pub fn intrinsics(&self) -> &HashSet<Intrinsic> {
        &self.intrinsics
    }

    pub fn vertex_shader(&self) -> &str {
        &self.vertex_shader
    }

    pub fn fragment_shader(&self) -> &str {
        &self.fragment_shader
    }

    pub fn vertex_manifest(&self) -> &Manifest {
        &self.vertex_manifest
    }

    pub fn uniform_manifest(&self) -> &Manifest {
        &self.uniform_manifest
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::abstract_vgen::{AbstractVGen, Rates};
    use crate::sampler_config::SamplerConfig;
    use crate::shape::Quad;
    use crate::vgen::SamplerBinding;

    fn double_template() -> Arc<AbstractVGen> {
        Arc::new(
            AbstractVGen::new(
                "Double",
                Rates::FRAME | Rates::SHAPE | Rates::PIXEL,
                false,
                vec!["a".to_string()],
                vec!["out".to_string()],
                vec![vec![1], vec![2], vec![3], vec![4]],
                vec![vec![1], vec![2], vec![3], vec![4]],
                "@out = 2.0 * @a;",
            )
            .unwrap(),
        )
    }

    fn frag_out_template() -> Arc<AbstractVGen> {
        Arc::new(
            AbstractVGen::new(
                "FragOut",
                Rates::PIXEL,
                false,
                vec!["a".to_string()],
                vec!["out".to_string()],
                vec![vec![1]],
                vec![vec![4]],
                "@out = vec4(@a, @a, @a, 1.0);",
            )
            .unwrap(),
        )
    }

    fn oscillator_template() -> Arc<AbstractVGen> {
        Arc::new(
            AbstractVGen::new(
                "SinOsc",
                Rates::PIXEL,
                false,
                vec!["freq".to_string()],
                vec!["out".to_string()],
                vec![vec![1]],
                vec![vec![1]],
                "@out = sin(2.0 * @pi * @freq * @time);",
            )
            .unwrap(),
        )
    }

    fn sampler_template() -> Arc<AbstractVGen> {
        Arc::new(
            AbstractVGen::new(
                "VSampler",
                Rates::PIXEL,
                true,
                vec![],
                vec!["out".to_string()],
                vec![vec![]],
                vec![vec![4]],
                "@out = texture(@sampler, @texPos);",
            )
            .unwrap(),
        )
    }

    fn chain(rate0: Rate) -> AbstractScinthDef {
        let mut first = VGen::new(double_template(), rate0);
        first.add_input(VGenInput::Constant1(1.0));
        first.add_output(1);
        let mut second = VGen::new(frag_out_template(), Rate::Pixel);
        second.add_input(VGenInput::VGenOutput {
            vgen_index: 0,
            output_index: 0,
            dimension: 1,
        });
        second.add_output(4);
        AbstractScinthDef::build(
            "chained",
            Vec::new(),
            vec![first, second],
            Box::new(Quad::new(1, 1)),
        )
        .unwrap()
    }

    #[test]
    fn builds_pixel_rate_chain() {
        let def = chain(Rate::Pixel);
        assert_eq!("chained", def.name());
        assert_eq!("chained_out_0_0", def.name_for_vgen_output(0, 0));
        assert!(def
            .fragment_shader()
            .contains("float chained_out_0_0 = 2.0 * 1.0;"));
        assert!(def
            .fragment_shader()
            .contains("chained_fragColor = chained_out_1_0;"));
        // Only the position attribute feeds the vertex stage.
        assert_eq!(1, def.vertex_manifest().number_of_elements());
        assert_eq!(0, def.uniform_manifest().number_of_elements());
    }

    #[test]
    fn shape_rate_result_becomes_a_varying() {
        let def = chain(Rate::Shape);
        assert!(def
            .vertex_shader()
            .contains("layout(location = 0) out float chained_out_0_0;"));
        assert!(def.vertex_shader().contains("chained_out_0_0 = 2.0 * 1.0;"));
        assert!(def
            .fragment_shader()
            .contains("layout(location = 0) in float chained_out_0_0;"));
    }

    #[test]
    fn time_intrinsic_lands_in_uniform_manifest() {
        let mut osc = VGen::new(oscillator_template(), Rate::Pixel);
        osc.add_input(VGenInput::Constant1(2.0));
        osc.add_output(1);
        let mut frag = VGen::new(frag_out_template(), Rate::Pixel);
        frag.add_input(VGenInput::VGenOutput {
            vgen_index: 0,
            output_index: 0,
            dimension: 1,
        });
        frag.add_output(4);
        let def = AbstractScinthDef::build(
            "osc",
            Vec::new(),
            vec![osc, frag],
            Box::new(Quad::new(1, 1)),
        )
        .unwrap();
        assert_eq!(1, def.uniform_manifest().number_of_elements());
        assert_eq!(
            Some(Intrinsic::Time),
            def.uniform_manifest().intrinsic_for_element(0)
        );
        assert!(def.fragment_shader().contains("osc_ubo.osc_time"));
    }

    #[test]
    fn parameters_emit_push_constant_block() {
        let mut osc = VGen::new(oscillator_template(), Rate::Pixel);
        osc.add_input(VGenInput::Parameter(0));
        osc.add_output(1);
        let mut frag = VGen::new(frag_out_template(), Rate::Pixel);
        frag.add_input(VGenInput::VGenOutput {
            vgen_index: 0,
            output_index: 0,
            dimension: 1,
        });
        frag.add_output(4);
        let def = AbstractScinthDef::build(
            "param",
            vec![Parameter::new("freq", 440.0)],
            vec![osc, frag],
            Box::new(Quad::new(1, 1)),
        )
        .unwrap();
        assert_eq!(Some(0), def.index_for_parameter_name("freq"));
        assert!(def.fragment_shader().contains("layout(push_constant)"));
        assert!(def.fragment_shader().contains("param_parameters.freq"));
    }

    #[test]
    fn sampler_vgen_records_fixed_image() {
        let mut sampler = VGen::new(sampler_template(), Rate::Pixel);
        sampler.add_output(4);
        sampler.set_sampler(SamplerBinding {
            image: ImageSource::Constant(12),
            config: SamplerConfig::new(),
        });
        let def = AbstractScinthDef::build(
            "sampled",
            Vec::new(),
            vec![sampler],
            Box::new(Quad::new(1, 1)),
        )
        .unwrap();
        assert_eq!(1, def.fixed_images().len());
        assert!(def.fixed_images().contains(&(0, 12)));
        let bindings = def.image_bindings();
        assert_eq!(1, bindings.len());
        assert_eq!(0, bindings[0].binding);
        assert!(def
            .fragment_shader()
            .contains("uniform sampler2D sampled_sampler_00000000_img_12;"));
        // texPos intrinsic pulls the texture coordinates into the vertex
        // manifest alongside position.
        assert_eq!(2, def.vertex_manifest().number_of_elements());
    }

    #[test]
    fn single_channel_final_output_is_widened() {
        let mut only = VGen::new(double_template(), Rate::Pixel);
        only.add_input(VGenInput::Constant1(0.5));
        only.add_output(1);
        let def = AbstractScinthDef::build(
            "mono",
            Vec::new(),
            vec![only],
            Box::new(Quad::new(1, 1)),
        )
        .unwrap();
        assert!(def
            .fragment_shader()
            .contains("mono_fragColor = vec4(mono_out_0_0, mono_out_0_0, mono_out_0_0, 1.0);"));
    }

    #[test]
    fn rejects_forward_reference() {
        let mut first = VGen::new(frag_out_template(), Rate::Pixel);
        first.add_input(VGenInput::VGenOutput {
            vgen_index: 0,
            output_index: 0,
            dimension: 1,
        });
        first.add_output(4);
        let result = AbstractScinthDef::build(
            "bad",
            Vec::new(),
            vec![first],
            Box::new(Quad::new(1, 1)),
        );
        assert!(matches!(result, Err(BuildError::ForwardReference { .. })));
    }

    #[test]
    fn rejects_duplicate_parameter_names() {
        let mut frag = VGen::new(frag_out_template(), Rate::Pixel);
        frag.add_input(VGenInput::Constant1(1.0));
        frag.add_output(4);
        let result = AbstractScinthDef::build(
            "dup",
            vec![Parameter::new("x", 0.0), Parameter::new("x", 1.0)],
            vec![frag],
            Box::new(Quad::new(1, 1)),
        );
        assert!(matches!(
            result,
            Err(BuildError::DuplicateParameterName { .. })
        ));
    }

    #[test]
    fn rejects_non_pixel_final_vgen() {
        let mut only = VGen::new(double_template(), Rate::Shape);
        only.add_input(VGenInput::Constant1(1.0));
        only.add_output(1);
        let result = AbstractScinthDef::build(
            "unfinished",
            Vec::new(),
            vec![only],
            Box::new(Quad::new(1, 1)),
        );
        assert!(matches!(result, Err(BuildError::FinalOutput)));
    }
}
