use std::sync::Arc;

use anyhow::anyhow;
use log::debug;

use crate::vulkan::logical_device::LogicalDevice;
use crate::vulkan::shader::{ShaderModule, ShaderStage};

/// Compiles the GLSL sources a ScinthDef synthesizes into SPIR-V shader
/// modules, in process.
#[derive(Debug, Default)]
pub struct ShaderCompiler {}

impl ShaderCompiler {
    pub fn new() -> ShaderCompiler {
        Default::default()
    }

    pub fn compile(
        &self,
        device: &Arc<LogicalDevice>,
        source: &str,
        name: &str,
        stage: ShaderStage,
    ) -> anyhow::Result<Arc<ShaderModule>> {
        let spirv = Self::compile_spirv(source, name, stage)?;
        ShaderModule::new(device.clone(), stage, &spirv)
    }

    pub fn compile_spirv(
        source: &str,
        name: &str,
        stage: ShaderStage,
    ) -> anyhow::Result<Vec<u32>> {
        let naga_stage = match stage {
            ShaderStage::Vertex => naga::ShaderStage::Vertex,
            ShaderStage::Fragment => naga::ShaderStage::Fragment,
        };

        let mut frontend = naga::front::glsl::Frontend::default();
        let module = frontend
            .parse(&naga::front::glsl::Options::from(naga_stage), source)
            .map_err(|err| anyhow!("failed to parse shader {name}: {err:?}"))?;

        let info = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::PUSH_CONSTANT,
        )
        .validate(&module)
        .map_err(|err| anyhow!("failed to validate shader {name}: {err:?}"))?;

        let spirv = naga::back::spv::write_vec(
            &module,
            &info,
            &naga::back::spv::Options {
                flags: naga::back::spv::WriterFlags::empty(),
                ..Default::default()
            },
            Some(&naga::back::spv::PipelineOptions {
                shader_stage: naga_stage,
                entry_point: "main".to_string(),
            }),
        )
        .map_err(|err| anyhow!("failed to write spirv for shader {name}: {err}"))?;

        debug!("compiled shader {name} to {} words of spirv", spirv.len());
        Ok(spirv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_minimal_vertex_shader() {
        let source = r#"#version 450
layout(location = 0) in vec2 pos;
void main() {
    gl_Position = vec4(pos, 0.0, 1.0);
}
"#;
        let spirv = ShaderCompiler::compile_spirv(source, "test_vertex", ShaderStage::Vertex)
            .unwrap();
        // SPIR-V magic number leads the binary.
        assert_eq!(0x0723_0203, spirv[0]);
    }

    #[test]
    fn compiles_fragment_with_push_constants() {
        let source = r#"#version 450
layout(push_constant) uniform Params {
    float gain;
} params;
layout(location = 0) out vec4 color;
void main() {
    color = vec4(params.gain, 0.0, 0.0, 1.0);
}
"#;
        let spirv =
            ShaderCompiler::compile_spirv(source, "test_fragment", ShaderStage::Fragment)
                .unwrap();
        assert_eq!(0x0723_0203, spirv[0]);
    }

    #[test]
    fn reports_parse_errors() {
        assert!(ShaderCompiler::compile_spirv(
            "#version 450\nvoid main( { }",
            "broken",
            ShaderStage::Vertex
        )
        .is_err());
    }
}
