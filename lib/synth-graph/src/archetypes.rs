use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use log::{error, info, warn};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_yaml::Value;

use crate::abstract_scinth_def::AbstractScinthDef;
use crate::abstract_vgen::{AbstractVGen, Rate, Rates};
use crate::parameter::Parameter;
use crate::sampler_config::{AddressMode, ClampBorderColor, FilterMode, SamplerConfig};
use crate::shape::{Quad, Shape};
use crate::vgen::{ImageSource, SamplerBinding, VGen, VGenInput};

/// Parses the yaml document stream into AbstractVGen and AbstractScinthDef
/// objects and keeps the process-wide registries of both.
///
/// Parsing is strict but per-document: a malformed document logs and is
/// skipped while the rest of the stream continues. Lookups take the shared
/// side of the registry locks; inserts and erases take the exclusive side.
#[derive(Debug, Default)]
pub struct Archetypes {
    abstract_vgens: RwLock<HashMap<String, Arc<AbstractVGen>>>,
    scinth_defs: RwLock<HashMap<String, Arc<AbstractScinthDef>>>,
}

fn parse_yaml_documents(yaml: &str) -> Vec<Value> {
    let mut documents = Vec::new();
    for deserializer in serde_yaml::Deserializer::from_str(yaml) {
        match Value::deserialize(deserializer) {
            Ok(value) => documents.push(value),
            Err(err) => {
                error!("error parsing yaml document: {err}");
            }
        }
    }
    documents
}

fn filter_mode_named(name: &str) -> Option<FilterMode> {
    match name {
        "linear" => Some(FilterMode::Linear),
        "nearest" => Some(FilterMode::Nearest),
        _ => None,
    }
}

fn address_mode_named(name: &str) -> Option<AddressMode> {
    match name {
        "clampToBorder" => Some(AddressMode::ClampToBorder),
        "clampToEdge" => Some(AddressMode::ClampToEdge),
        "repeat" => Some(AddressMode::Repeat),
        "mirroredRepeat" => Some(AddressMode::MirroredRepeat),
        _ => None,
    }
}

fn border_color_named(name: &str) -> Option<ClampBorderColor> {
    match name {
        "transparentBlack" => Some(ClampBorderColor::TransparentBlack),
        "black" => Some(ClampBorderColor::Black),
        "white" => Some(ClampBorderColor::White),
        _ => None,
    }
}

impl Archetypes {
    pub fn new() -> Archetypes {
        Default::default()
    }

    /// Parse ScinthDefs from the supplied yaml file, returning the defs that
    /// parsed, validated, and built.
    pub fn load_from_file(&self, file_name: &Path) -> Vec<Arc<AbstractScinthDef>> {
        let yaml = match std::fs::read_to_string(file_name) {
            Ok(yaml) => yaml,
            Err(err) => {
                error!("failed to read ScinthDef yaml file {file_name:?}: {err}");
                return Vec::new();
            }
        };
        self.parse_from_string(&yaml)
    }

    /// Parse ScinthDefs from a yaml string with one or more documents.
    pub fn parse_from_string(&self, yaml: &str) -> Vec<Arc<AbstractScinthDef>> {
        let mut scinth_defs = Vec::new();
        for node in parse_yaml_documents(yaml) {
            if !node.is_mapping() {
                error!("top-level yaml node is not a map");
                continue;
            }
            // A document carrying rates and shader keys is an AbstractVGen,
            // admitted into the vgen registry instead.
            if node.get("rates").is_some() && node.get("shader").is_some() {
                self.extract_abstract_vgen(&node);
                continue;
            }
            if let Some(scinth_def) = self.extract_scinth_def(&node) {
                scinth_defs.push(scinth_def);
            }
        }
        scinth_defs
    }

    pub fn abstract_scinth_def_named(&self, name: &str) -> Option<Arc<AbstractScinthDef>> {
        self.scinth_defs.read().get(name).cloned()
    }

    pub fn free_abstract_scinth_defs(&self, names: &[String]) {
        let mut defs = self.scinth_defs.write();
        for name in names {
            if defs.remove(name).is_none() {
                warn!("failed to free AbstractScinthDef {name}, name not found");
            }
        }
    }

    pub fn number_of_abstract_scinth_defs(&self) -> usize {
        self.scinth_defs.read().len()
    }

    /// Parse AbstractVGens from the supplied yaml file, returning the number
    /// of valid VGens admitted, or -1 on file error.
    pub fn load_abstract_vgens_from_file(&self, file_name: &Path) -> i32 {
        let yaml = match std::fs::read_to_string(file_name) {
            Ok(yaml) => yaml,
            Err(err) => {
                error!("failed to read VGen yaml file {file_name:?}: {err}");
                return -1;
            }
        };
        self.parse_abstract_vgens_from_string(&yaml)
    }

    pub fn parse_abstract_vgens_from_string(&self, yaml: &str) -> i32 {
        let mut valid = 0;
        for node in parse_yaml_documents(yaml) {
            if !node.is_mapping() {
                error!("top-level abstract VGen yaml node is not a map");
                continue;
            }
            if self.extract_abstract_vgen(&node) {
                valid += 1;
            }
        }
        valid
    }

    pub fn abstract_vgen_named(&self, name: &str) -> Option<Arc<AbstractVGen>> {
        self.abstract_vgens.read().get(name).cloned()
    }

    pub fn number_of_abstract_vgens(&self) -> usize {
        self.abstract_vgens.read().len()
    }

    fn extract_abstract_vgen(&self, node: &Value) -> bool {
        let name = match node.get("name").and_then(Value::as_str) {
            Some(name) => name.to_string(),
            None => {
                error!("VGen name tag either absent or not a scalar");
                return false;
            }
        };

        let mut supported_rates = Rates::empty();
        let rates = match node.get("rates").and_then(Value::as_sequence) {
            Some(rates) => rates,
            None => {
                error!("VGen {name} rates tag either absent or not a list");
                return false;
            }
        };
        for rate_node in rates {
            match rate_node.as_str().and_then(Rate::named) {
                Some(rate) => supported_rates |= rate.as_flag(),
                None => {
                    error!("VGen {name} has unsupported rate tag");
                    supported_rates = Rates::empty();
                    break;
                }
            }
        }
        if supported_rates.is_empty() {
            error!("VGen {name} has problem with rate configuration");
            return false;
        }

        let is_sampler = node
            .get("sampler")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let outputs: Vec<String> = match node.get("outputs").and_then(Value::as_sequence) {
            Some(outputs) => outputs
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            None => {
                error!("VGen {name} outputs tag either absent or not a sequence");
                return false;
            }
        };
        if outputs.is_empty() {
            error!("VGen {name} has no outputs");
            return false;
        }

        let shader = match node.get("shader").and_then(Value::as_str) {
            Some(shader) => shader.to_string(),
            None => {
                error!("VGen {name} shader tag absent or not a scalar");
                return false;
            }
        };

        let inputs: Vec<String> = node
            .get("inputs")
            .and_then(Value::as_sequence)
            .map(|inputs| {
                inputs
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let dimensions = match node.get("dimensions").and_then(Value::as_sequence) {
            Some(dimensions) => dimensions,
            None => {
                error!("VGen {name} dimensions tag absent or not a sequence");
                return false;
            }
        };
        let mut input_dimensions: Vec<Vec<u32>> = Vec::new();
        let mut output_dimensions: Vec<Vec<u32>> = Vec::new();
        for dimension in dimensions {
            if !dimension.is_mapping() {
                error!("VGen {name} has dimensions list element that is not a map");
                return false;
            }
            // The inputs tag is optional for VGens without inputs. A single
            // number replicates across every input.
            let mut input_dims = Vec::new();
            if let Some(inputs_node) = dimension.get("inputs") {
                if let Some(dim) = inputs_node.as_u64() {
                    input_dims = vec![dim as u32; inputs.len()];
                } else if let Some(dims) = inputs_node.as_sequence() {
                    for dim in dims {
                        match dim.as_u64() {
                            Some(dim) => input_dims.push(dim as u32),
                            None => {
                                error!("VGen {name} has malformed inputs tag inside of dimension list");
                                return false;
                            }
                        }
                    }
                } else {
                    error!("VGen {name} has malformed inputs tag inside of dimension list");
                    return false;
                }
            }
            input_dimensions.push(input_dims);

            let outputs_node = match dimension.get("outputs") {
                Some(outputs_node) => outputs_node,
                None => {
                    error!("VGen {name} missing outputs tag inside of dimension list");
                    return false;
                }
            };
            let mut output_dims = Vec::new();
            if let Some(dim) = outputs_node.as_u64() {
                output_dims = vec![dim as u32; outputs.len()];
            } else if let Some(dims) = outputs_node.as_sequence() {
                for dim in dims {
                    match dim.as_u64() {
                        Some(dim) => output_dims.push(dim as u32),
                        None => {
                            error!("VGen {name} has malformed outputs tag inside of dimension list");
                            return false;
                        }
                    }
                }
            } else {
                error!("VGen {name} has malformed outputs tag inside of dimension list");
                return false;
            }
            output_dimensions.push(output_dims);
        }

        if output_dimensions.is_empty() {
            error!("VGen {name} has empty dimensions list");
            return false;
        }
        for i in 0..output_dimensions.len() {
            if output_dimensions[i].len() != outputs.len() {
                error!("VGen {name} has output dimensions list of unequal size to the number of outputs");
                return false;
            }
            if input_dimensions[i].len() != inputs.len() {
                error!("VGen {name} has input dimensions list of unequal size to the number of inputs");
                return false;
            }
        }

        let vgen = match AbstractVGen::new(
            &name,
            supported_rates,
            is_sampler,
            inputs,
            outputs,
            input_dimensions,
            output_dimensions,
            &shader,
        ) {
            Ok(vgen) => vgen,
            Err(err) => {
                error!("VGen {name} failed template preparation: {err}");
                return false;
            }
        };

        self.abstract_vgens
            .write()
            .insert(name, Arc::new(vgen));
        true
    }

    fn extract_scinth_def(&self, node: &Value) -> Option<Arc<AbstractScinthDef>> {
        let name = match node.get("name").and_then(Value::as_str) {
            Some(name) => name.to_string(),
            None => {
                error!("missing ScinthDef name tag");
                return None;
            }
        };

        let mut parameters = Vec::new();
        if let Some(parameters_node) = node.get("parameters") {
            let sequence = match parameters_node.as_sequence() {
                Some(sequence) => sequence,
                None => {
                    error!("ScinthDef {name} got non-sequence parameters key");
                    return None;
                }
            };
            for parameter in sequence {
                let parameter_name = parameter.get("name").and_then(Value::as_str);
                let default_value = parameter.get("defaultValue").and_then(Value::as_f64);
                match (parameter_name, default_value) {
                    (Some(parameter_name), Some(default_value)) => {
                        parameters.push(Parameter::new(parameter_name, default_value as f32));
                    }
                    _ => {
                        error!("ScinthDef {name} has parameters entry missing required key");
                        return None;
                    }
                }
            }
        }

        let shape = match self.extract_shape(&name, node) {
            Some(shape) => shape,
            None => return None,
        };

        let vgens = match node.get("vgens").and_then(Value::as_sequence) {
            Some(vgens) if !vgens.is_empty() => vgens,
            _ => {
                error!("ScinthDef {name} missing or empty vgens key");
                return None;
            }
        };

        let mut instances: Vec<VGen> = Vec::new();
        for vgen_node in vgens {
            let instance = match self.extract_vgen_instance(&name, vgen_node, &instances) {
                Some(instance) => instance,
                None => return None,
            };
            if let Err(err) = instance.validate() {
                error!("ScinthDef {name} has invalid VGen: {err}");
                return None;
            }
            instances.push(instance);
        }

        let scinth_def = match AbstractScinthDef::build(&name, parameters, instances, shape) {
            Ok(scinth_def) => Arc::new(scinth_def),
            Err(err) => {
                error!("ScinthDef {name} failed to build shaders: {err}");
                return None;
            }
        };

        self.scinth_defs
            .write()
            .insert(name.clone(), scinth_def.clone());
        info!("ScinthDef {name} parsed, validated, and added to Archetypes");
        Some(scinth_def)
    }

    fn extract_shape(&self, def_name: &str, node: &Value) -> Option<Box<dyn Shape>> {
        let shape_node = match node.get("shape") {
            Some(shape_node) => shape_node,
            None => return Some(Box::new(Quad::new(1, 1))),
        };
        if !shape_node.is_mapping() {
            error!("ScinthDef {def_name} has non-map shape key");
            return None;
        }
        let shape_name = shape_node
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("quad");
        match shape_name {
            "quad" => {
                let width_edges = shape_node
                    .get("widthEdges")
                    .and_then(Value::as_u64)
                    .unwrap_or(1) as u32;
                let height_edges = shape_node
                    .get("heightEdges")
                    .and_then(Value::as_u64)
                    .unwrap_or(1) as u32;
                Some(Box::new(Quad::new(width_edges, height_edges)))
            }
            _ => {
                error!("ScinthDef {def_name} has unsupported shape name {shape_name}");
                None
            }
        }
    }

    fn extract_vgen_instance(
        &self,
        def_name: &str,
        vgen_node: &Value,
        instances: &[VGen],
    ) -> Option<VGen> {
        if !vgen_node.is_mapping() {
            error!("ScinthDef {def_name} has vgen that is not a map");
            return None;
        }
        let class_name = match vgen_node.get("className").and_then(Value::as_str) {
            Some(class_name) => class_name.to_string(),
            None => {
                error!("ScinthDef {def_name} has vgen with no className key");
                return None;
            }
        };
        let template = match self.abstract_vgen_named(&class_name) {
            Some(template) => template,
            None => {
                error!("ScinthDef {def_name} has vgen with className {class_name} not defined");
                return None;
            }
        };

        let rate = match vgen_node.get("rate") {
            Some(rate_node) => match rate_node.as_str().and_then(Rate::named) {
                Some(rate) => rate,
                None => {
                    error!("ScinthDef {def_name} has VGen {class_name} with invalid rate key");
                    return None;
                }
            },
            None => Rate::Pixel,
        };

        let mut instance = VGen::new(template.clone(), rate);

        match vgen_node.get("sampler") {
            Some(sampler_node) if sampler_node.is_mapping() => {
                if !template.is_sampler() {
                    error!("ScinthDef {def_name} has non-sampler VGen {class_name} with sampler dictionary");
                    return None;
                }
                let binding =
                    self.extract_sampler_binding(def_name, &class_name, sampler_node)?;
                instance.set_sampler(binding);
            }
            _ => {
                if template.is_sampler() {
                    error!("ScinthDef {def_name} has sampler VGen {class_name} with no sampler dictionary");
                    return None;
                }
            }
        }

        let outputs = match vgen_node.get("outputs").and_then(Value::as_sequence) {
            Some(outputs) => outputs,
            None => {
                error!("ScinthDef {def_name} has vgen with className {class_name} with absent or malformed outputs key");
                return None;
            }
        };
        for output in outputs {
            match output.get("dimension").and_then(Value::as_u64) {
                Some(dimension) => instance.add_output(dimension as u32),
                None => {
                    error!("ScinthDef {def_name} has VGen {class_name} with absent or malformed dimension key");
                    return None;
                }
            }
        }

        if let Some(inputs) = vgen_node.get("inputs").and_then(Value::as_sequence) {
            for input_node in inputs {
                let input =
                    self.extract_vgen_input(def_name, &class_name, input_node, instances)?;
                instance.add_input(input);
            }
        }

        Some(instance)
    }

    fn extract_vgen_input(
        &self,
        def_name: &str,
        class_name: &str,
        input_node: &Value,
        instances: &[VGen],
    ) -> Option<VGenInput> {
        if !input_node.is_mapping() {
            error!("ScinthDef {def_name} has VGen {class_name} with non-map input");
            return None;
        }
        let input_type = match input_node.get("type").and_then(Value::as_str) {
            Some(input_type) => input_type,
            None => {
                error!("ScinthDef {def_name} has VGen {class_name} input with absent or malformed type key");
                return None;
            }
        };
        let dimension = match input_node.get("dimension").and_then(Value::as_u64) {
            Some(dimension) => dimension as u32,
            None => {
                error!("ScinthDef {def_name} has VGen {class_name} input with absent or malformed dimension key");
                return None;
            }
        };

        match input_type {
            "constant" => {
                let value_node = match input_node.get("value") {
                    Some(value_node) => value_node,
                    None => {
                        error!("ScinthDef {def_name} has VGen {class_name} constant input with no value key");
                        return None;
                    }
                };
                if let Some(value) = value_node.as_f64() {
                    if dimension != 1 {
                        error!("ScinthDef {def_name} has VGen {class_name} scalar constant with dimension {dimension}");
                        return None;
                    }
                    Some(VGenInput::Constant1(value as f32))
                } else if let Some(values) = value_node.as_sequence() {
                    let floats: Vec<f32> = values
                        .iter()
                        .filter_map(Value::as_f64)
                        .map(|v| v as f32)
                        .collect();
                    if floats.len() != values.len() || floats.len() != dimension as usize {
                        error!("ScinthDef {def_name} has VGen {class_name} constant value not matching dimension {dimension}");
                        return None;
                    }
                    match floats.len() {
                        2 => Some(VGenInput::Constant2([floats[0], floats[1]])),
                        3 => Some(VGenInput::Constant3([floats[0], floats[1], floats[2]])),
                        4 => Some(VGenInput::Constant4([
                            floats[0], floats[1], floats[2], floats[3],
                        ])),
                        _ => {
                            error!("ScinthDef {def_name} has VGen {class_name} constant with unsupported dimension");
                            None
                        }
                    }
                } else {
                    error!("ScinthDef {def_name} has VGen {class_name} constant input with malformed value key");
                    None
                }
            }
            "vgen" => {
                let vgen_index = input_node.get("vgenIndex").and_then(Value::as_u64);
                let output_index = input_node.get("outputIndex").and_then(Value::as_u64);
                let (vgen_index, output_index) = match (vgen_index, output_index) {
                    (Some(vgen_index), Some(output_index)) => {
                        (vgen_index as usize, output_index as usize)
                    }
                    _ => {
                        error!("ScinthDef {def_name} has VGen {class_name} vgen input with no vgenIndex or outputIndex key");
                        return None;
                    }
                };
                if vgen_index >= instances.len() {
                    error!("ScinthDef {def_name} has VGen {class_name} vgen input with invalid index {vgen_index}");
                    return None;
                }
                if output_index >= instances[vgen_index].number_of_outputs() {
                    error!("ScinthDef {def_name} has VGen {class_name} vgen input with invalid output index {output_index}");
                    return None;
                }
                Some(VGenInput::VGenOutput {
                    vgen_index,
                    output_index,
                    dimension,
                })
            }
            "parameter" => match input_node.get("index").and_then(Value::as_u64) {
                Some(index) => Some(VGenInput::Parameter(index as usize)),
                None => {
                    error!("ScinthDef {def_name} has VGen {class_name} parameter input with no index key");
                    None
                }
            },
            _ => {
                error!("ScinthDef {def_name} has VGen {class_name} with undefined input type {input_type}");
                None
            }
        }
    }

    fn extract_sampler_binding(
        &self,
        def_name: &str,
        class_name: &str,
        sampler_node: &Value,
    ) -> Option<SamplerBinding> {
        let image = match sampler_node.get("image").and_then(Value::as_i64) {
            Some(image) => image,
            None => {
                error!("ScinthDef {def_name} has sampler VGen {class_name} missing image key");
                return None;
            }
        };
        let image_arg_type = sampler_node
            .get("imageArgType")
            .and_then(Value::as_str)
            .unwrap_or("constant");
        let image = match image_arg_type {
            "constant" => ImageSource::Constant(image as i32),
            "parameter" => ImageSource::Parameter(image as usize),
            _ => {
                error!("ScinthDef {def_name} has sampler VGen {class_name} with invalid image arg type string {image_arg_type}");
                return None;
            }
        };

        let mut config = SamplerConfig::new();
        if let Some(mode) = sampler_node.get("minFilterMode") {
            match mode.as_str().and_then(filter_mode_named) {
                Some(mode) => config.set_min_filter_mode(mode),
                None => {
                    error!("ScinthDef {def_name} has sampler VGen {class_name} with unsupported minFilterMode");
                    return None;
                }
            }
        }
        if let Some(mode) = sampler_node.get("magFilterMode") {
            match mode.as_str().and_then(filter_mode_named) {
                Some(mode) => config.set_mag_filter_mode(mode),
                None => {
                    error!("ScinthDef {def_name} has sampler VGen {class_name} with unsupported magFilterMode");
                    return None;
                }
            }
        }
        if let Some(enable) = sampler_node.get("enableAnisotropicFiltering") {
            match enable.as_bool() {
                Some(enable) => config.enable_anisotropic_filtering(enable),
                None => {
                    error!("ScinthDef {def_name} has sampler VGen {class_name} with malformed enableAnisotropicFiltering");
                    return None;
                }
            }
        }
        if let Some(mode) = sampler_node.get("addressModeU") {
            match mode.as_str().and_then(address_mode_named) {
                Some(mode) => config.set_address_mode_u(mode),
                None => {
                    error!("ScinthDef {def_name} has sampler VGen {class_name} with unsupported addressModeU");
                    return None;
                }
            }
        }
        if let Some(mode) = sampler_node.get("addressModeV") {
            match mode.as_str().and_then(address_mode_named) {
                Some(mode) => config.set_address_mode_v(mode),
                None => {
                    error!("ScinthDef {def_name} has sampler VGen {class_name} with unsupported addressModeV");
                    return None;
                }
            }
        }
        if let Some(color) = sampler_node.get("clampBorderColor") {
            match color.as_str().and_then(border_color_named) {
                Some(color) => config.set_clamp_border_color(color),
                None => {
                    error!("ScinthDef {def_name} has sampler VGen {class_name} with unsupported clampBorderColor");
                    return None;
                }
            }
        }

        Some(SamplerBinding { image, config })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE_VGENS: &str = r#"---
name: Double
rates: [ frame, shape, pixel ]
inputs: [ a ]
outputs: [ out ]
dimensions:
    - inputs: 1
      outputs: 1
    - inputs: 2
      outputs: 2
    - inputs: 3
      outputs: 3
    - inputs: 4
      outputs: 4
shader: "@out = 2.0 * @a;"
---
name: FragOut
rates: [ pixel ]
inputs: [ a ]
outputs: [ out ]
dimensions:
    - inputs: 1
      outputs: 4
shader: "@out = vec4(@a, @a, @a, 1.0);"
"#;

    fn archetypes_with_base_vgens() -> Archetypes {
        let archetypes = Archetypes::new();
        assert_eq!(2, archetypes.parse_abstract_vgens_from_string(BASE_VGENS));
        archetypes
    }

    #[test]
    fn admits_no_input_def() {
        let archetypes = Archetypes::new();
        assert_eq!(
            1,
            archetypes.parse_abstract_vgens_from_string(
                r#"
name: NoInput
rates: [ pixel ]
outputs: [ out ]
dimensions:
    - outputs: 4
shader: "@out = vec4(1.0);"
"#,
            )
        );
        let defs = archetypes.parse_from_string(
            r#"
name: firstScinth
shape:
    name: quad
    widthEdges: 1
    heightEdges: 1
vgens:
    - className: NoInput
      rate: pixel
      outputs:
          - dimension: 4
"#,
        );
        assert_eq!(1, defs.len());
        assert_eq!(1, archetypes.number_of_abstract_scinth_defs());
        let def = archetypes.abstract_scinth_def_named("firstScinth").unwrap();
        assert_eq!(1, def.instances().len());
        assert_eq!("NoInput", def.instances()[0].template().name());
        assert!(def.instances()[0].inputs().is_empty());
    }

    #[test]
    fn admits_chained_def() {
        let archetypes = archetypes_with_base_vgens();
        let defs = archetypes.parse_from_string(
            r#"
name: a
vgens:
    - className: Double
      rate: pixel
      inputs:
          - type: constant
            dimension: 1
            value: 1.0
      outputs:
          - dimension: 1
    - className: Double
      rate: pixel
      inputs:
          - type: vgen
            dimension: 1
            vgenIndex: 0
            outputIndex: 0
      outputs:
          - dimension: 1
    - className: FragOut
      rate: pixel
      inputs:
          - type: vgen
            dimension: 1
            vgenIndex: 1
            outputIndex: 0
      outputs:
          - dimension: 4
"#,
        );
        assert_eq!(1, defs.len());
    }

    #[test]
    fn skips_bad_documents_and_continues() {
        let archetypes = archetypes_with_base_vgens();
        let defs = archetypes.parse_from_string(
            r#"---
name: good
vgens:
    - className: FragOut
      inputs:
          - type: constant
            dimension: 1
            value: 0.5
      outputs:
          - dimension: 4
---
name: badClassName
vgens:
    - className: NotDefined
      outputs:
          - dimension: 4
---
name: alsoGood
vgens:
    - className: FragOut
      inputs:
          - type: constant
            dimension: 1
            value: 1.0
      outputs:
          - dimension: 4
"#,
        );
        assert_eq!(2, defs.len());
        assert_eq!(2, archetypes.number_of_abstract_scinth_defs());
        assert!(archetypes.abstract_scinth_def_named("good").is_some());
        assert!(archetypes.abstract_scinth_def_named("badClassName").is_none());
    }

    #[test]
    fn rejects_forward_vgen_reference() {
        let archetypes = archetypes_with_base_vgens();
        let defs = archetypes.parse_from_string(
            r#"
name: forward
vgens:
    - className: FragOut
      inputs:
          - type: vgen
            dimension: 1
            vgenIndex: 1
            outputIndex: 0
      outputs:
          - dimension: 4
"#,
        );
        assert!(defs.is_empty());
    }

    #[test]
    fn duplicate_def_name_overwrites() {
        let archetypes = archetypes_with_base_vgens();
        let source = |value: &str| {
            format!(
                r#"
name: replaced
vgens:
    - className: FragOut
      inputs:
          - type: constant
            dimension: 1
            value: {value}
      outputs:
          - dimension: 4
"#
            )
        };
        assert_eq!(1, archetypes.parse_from_string(&source("0.25")).len());
        assert_eq!(1, archetypes.parse_from_string(&source("0.75")).len());
        assert_eq!(1, archetypes.number_of_abstract_scinth_defs());
        let def = archetypes.abstract_scinth_def_named("replaced").unwrap();
        assert_eq!(
            VGenInput::Constant1(0.75),
            def.instances()[0].inputs()[0].clone()
        );
    }

    #[test]
    fn rejects_mismatched_dimension_lists() {
        let archetypes = Archetypes::new();
        assert_eq!(
            0,
            archetypes.parse_abstract_vgens_from_string(
                r#"
name: Broken
rates: [ pixel ]
inputs: [ a, b ]
outputs: [ out ]
dimensions:
    - inputs: [ 1 ]
      outputs: 1
shader: "@out = @a + @b;"
"#,
            )
        );
    }

    #[test]
    fn parses_sampler_vgen_and_def() {
        let archetypes = Archetypes::new();
        assert_eq!(
            1,
            archetypes.parse_abstract_vgens_from_string(
                r#"
name: VSampler
rates: [ pixel ]
sampler: true
outputs: [ out ]
dimensions:
    - outputs: 4
shader: "@out = texture(@sampler, @texPos);"
"#,
            )
        );
        let defs = archetypes.parse_from_string(
            r#"
name: sampled
vgens:
    - className: VSampler
      rate: pixel
      sampler:
          image: 7
          imageArgType: constant
          minFilterMode: nearest
          addressModeU: repeat
          addressModeV: clampToEdge
          clampBorderColor: white
      outputs:
          - dimension: 4
"#,
        );
        assert_eq!(1, defs.len());
        let def = &defs[0];
        assert_eq!(1, def.fixed_images().len());
        let (key, image_id) = *def.fixed_images().iter().next().unwrap();
        assert_eq!(7, image_id);
        let config = SamplerConfig::from_key(key);
        assert_eq!(FilterMode::Nearest, config.min_filter_mode());
        assert_eq!(AddressMode::Repeat, config.address_mode_u());
        assert_eq!(AddressMode::ClampToEdge, config.address_mode_v());
        assert_eq!(ClampBorderColor::White, config.clamp_border_color());
    }

    #[test]
    fn vgen_documents_in_def_streams_are_admitted_as_vgens() {
        let archetypes = Archetypes::new();
        let defs = archetypes.parse_from_string(BASE_VGENS);
        assert!(defs.is_empty());
        assert_eq!(2, archetypes.number_of_abstract_vgens());
    }
}
