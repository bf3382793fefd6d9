use std::collections::{HashMap, HashSet};

use bitflags::bitflags;
use thiserror::Error;

use crate::intrinsic::Intrinsic;

bitflags! {
    /// The evaluation frequencies a VGen template supports: per-frame
    /// (uniform), per-shape (vertex), or per-pixel (fragment).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Rates: u32 {
        const FRAME = 0x1;
        const SHAPE = 0x2;
        const PIXEL = 0x4;
    }
}

/// One selected evaluation rate for a VGen instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rate {
    Frame,
    Shape,
    Pixel,
}

impl Rate {
    pub fn as_flag(&self) -> Rates {
        match self {
            Rate::Frame => Rates::FRAME,
            Rate::Shape => Rates::SHAPE,
            Rate::Pixel => Rates::PIXEL,
        }
    }

    pub fn named(name: &str) -> Option<Rate> {
        match name {
            "frame" => Some(Rate::Frame),
            "shape" => Some(Rate::Shape),
            "pixel" => Some(Rate::Pixel),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("duplicate parameter name {name}")]
    DuplicateName { name: String },
    #[error("reserved intrinsic name {name} used as input or output")]
    ReservedName { name: String },
    #[error("unidentified token @{token} at position {position}")]
    UnknownToken { token: String, position: usize },
    #[error("no output referenced in shader template")]
    NoOutputReferenced,
    #[error("substitution count mismatch, expected {expected} {kind}, got {actual}")]
    CountMismatch {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("unsupported dimension {dimension} for output {index}")]
    UnsupportedDimension { dimension: u32, index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Input(usize),
    Output(usize),
    Intrinsic(Intrinsic),
}

#[derive(Debug, Clone)]
struct Token {
    /// Byte offset of the `@` character in the template string.
    position: usize,
    /// Length of the token including the `@` prefix.
    length: usize,
    kind: TokenKind,
}

/// Immutable template for one shader-graph primitive: named inputs and
/// outputs, supported rates and dimension variants, and a shader source
/// snippet in which `@name` tokens reference inputs, outputs, or intrinsics.
///
/// The snippet is scanned once at construction into a token list so that
/// [`AbstractVGen::parameterize`] is a straight substitution pass.
#[derive(Debug)]
pub struct AbstractVGen {
    name: String,
    rates: Rates,
    is_sampler: bool,
    inputs: Vec<String>,
    outputs: Vec<String>,
    input_dimensions: Vec<Vec<u32>>,
    output_dimensions: Vec<Vec<u32>>,
    shader: String,
    tokens: Vec<Token>,
    intrinsics: HashSet<Intrinsic>,
}

impl AbstractVGen {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        rates: Rates,
        is_sampler: bool,
        inputs: Vec<String>,
        outputs: Vec<String>,
        input_dimensions: Vec<Vec<u32>>,
        output_dimensions: Vec<Vec<u32>>,
        shader: &str,
    ) -> Result<AbstractVGen, TemplateError> {
        let mut vgen = AbstractVGen {
            name: name.to_string(),
            rates,
            is_sampler,
            inputs,
            outputs,
            input_dimensions,
            output_dimensions,
            shader: shader.to_string(),
            tokens: Vec::new(),
            intrinsics: HashSet::new(),
        };
        vgen.prepare_template()?;
        Ok(vgen)
    }

    /// Scan the shader snippet for `@word` tokens (longest match over
    /// alphanumerics and underscore), resolving each against the declared
    /// inputs, then outputs, then the intrinsic registry.
    fn prepare_template(&mut self) -> Result<(), TemplateError> {
        let mut names: HashMap<&str, TokenKind> = HashMap::new();
        for (i, input) in self.inputs.iter().enumerate() {
            if Intrinsic::named(input).is_some() {
                return Err(TemplateError::ReservedName {
                    name: input.clone(),
                });
            }
            if names.insert(input.as_str(), TokenKind::Input(i)).is_some() {
                return Err(TemplateError::DuplicateName {
                    name: input.clone(),
                });
            }
        }
        for (i, output) in self.outputs.iter().enumerate() {
            if Intrinsic::named(output).is_some() {
                return Err(TemplateError::ReservedName {
                    name: output.clone(),
                });
            }
            if names.insert(output.as_str(), TokenKind::Output(i)).is_some() {
                return Err(TemplateError::DuplicateName {
                    name: output.clone(),
                });
            }
        }

        let mut output_found = false;
        let bytes = self.shader.as_bytes();
        let mut pos = 0;
        while pos < bytes.len() {
            if bytes[pos] != b'@' {
                pos += 1;
                continue;
            }
            let start = pos + 1;
            let mut end = start;
            while end < bytes.len()
                && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_')
            {
                end += 1;
            }
            if end == start {
                pos += 1;
                continue;
            }
            let word = &self.shader[start..end];
            let kind = if let Some(kind) = names.get(word) {
                *kind
            } else if let Some(intrinsic) = Intrinsic::named(word) {
                self.intrinsics.insert(intrinsic);
                TokenKind::Intrinsic(intrinsic)
            } else {
                return Err(TemplateError::UnknownToken {
                    token: word.to_string(),
                    position: pos,
                });
            };
            if matches!(kind, TokenKind::Output(_)) {
                output_found = true;
            }
            self.tokens.push(Token {
                position: pos,
                length: end - pos,
                kind,
            });
            pos = end;
        }

        if !output_found {
            return Err(TemplateError::NoOutputReferenced);
        }
        Ok(())
    }

    /// Produce a shader fragment by substituting the supplied strings for
    /// every recorded token. The first appearance of each output receives a
    /// type declaration chosen by its dimension, unless the output's
    /// substituted name is in `already_declared`.
    pub fn parameterize(
        &self,
        inputs: &[String],
        intrinsics: &HashMap<Intrinsic, String>,
        outputs: &[String],
        output_dimensions: &[u32],
        already_declared: &HashSet<String>,
    ) -> Result<String, TemplateError> {
        if inputs.len() != self.inputs.len() {
            return Err(TemplateError::CountMismatch {
                kind: "inputs",
                expected: self.inputs.len(),
                actual: inputs.len(),
            });
        }
        if outputs.len() != self.outputs.len() {
            return Err(TemplateError::CountMismatch {
                kind: "outputs",
                expected: self.outputs.len(),
                actual: outputs.len(),
            });
        }

        let mut shader = String::with_capacity(self.shader.len());
        let mut shader_pos = 0;
        let mut outputs_encountered: HashSet<usize> = HashSet::new();
        for token in &self.tokens {
            if shader_pos < token.position {
                shader.push_str(&self.shader[shader_pos..token.position]);
            }
            match token.kind {
                TokenKind::Input(index) => shader.push_str(&inputs[index]),
                TokenKind::Intrinsic(intrinsic) => {
                    if let Some(substitution) = intrinsics.get(&intrinsic) {
                        shader.push_str(substitution);
                    } else {
                        return Err(TemplateError::CountMismatch {
                            kind: "intrinsics",
                            expected: self.intrinsics.len(),
                            actual: intrinsics.len(),
                        });
                    }
                }
                TokenKind::Output(index) => {
                    if outputs_encountered.insert(index)
                        && !already_declared.contains(&outputs[index])
                    {
                        match output_dimensions[index] {
                            1 => shader.push_str("float "),
                            2 => shader.push_str("vec2 "),
                            3 => shader.push_str("vec3 "),
                            4 => shader.push_str("vec4 "),
                            dimension => {
                                return Err(TemplateError::UnsupportedDimension {
                                    dimension,
                                    index,
                                })
                            }
                        }
                    }
                    shader.push_str(&outputs[index]);
                }
            }
            shader_pos = token.position + token.length;
        }
        shader.push_str(&self.shader[shader_pos..]);
        Ok(shader)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rates(&self) -> Rates {
        self.rates
    }

    pub fn is_sampler(&self) -> bool {
        self.is_sampler
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    pub fn input_dimensions(&self) -> &[Vec<u32>] {
        &self.input_dimensions
    }

    pub fn output_dimensions(&self) -> &[Vec<u32>] {
        &self.output_dimensions
    }

    pub fn shader(&self) -> &str {
        &self.shader
    }

    pub fn intrinsics(&self) -> &HashSet<Intrinsic> {
        &self.intrinsics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_vgen(shader: &str) -> Result<AbstractVGen, TemplateError> {
        AbstractVGen::new(
            "Test",
            Rates::PIXEL,
            false,
            vec!["a".to_string(), "b".to_string()],
            vec!["out".to_string()],
            vec![vec![1, 1]],
            vec![vec![1]],
            shader,
        )
    }

    #[test]
    fn resolves_inputs_outputs_and_intrinsics() {
        let vgen = simple_vgen("@out = @a * @b + @time;").unwrap();
        assert_eq!(1, vgen.intrinsics().len());
        assert!(vgen.intrinsics().contains(&Intrinsic::Time));
    }

    #[test]
    fn rejects_unknown_tokens() {
        assert!(matches!(
            simple_vgen("@out = @nope;"),
            Err(TemplateError::UnknownToken { .. })
        ));
    }

    #[test]
    fn rejects_missing_output() {
        assert!(matches!(
            simple_vgen("float x = @a;"),
            Err(TemplateError::NoOutputReferenced)
        ));
    }

    #[test]
    fn rejects_duplicate_and_reserved_names() {
        let dup = AbstractVGen::new(
            "Dup",
            Rates::PIXEL,
            false,
            vec!["a".to_string()],
            vec!["a".to_string()],
            vec![vec![1]],
            vec![vec![1]],
            "@a = 1.0;",
        );
        assert!(matches!(dup, Err(TemplateError::DuplicateName { .. })));

        let reserved = AbstractVGen::new(
            "Reserved",
            Rates::PIXEL,
            false,
            vec!["time".to_string()],
            vec!["out".to_string()],
            vec![vec![1]],
            vec![vec![1]],
            "@out = @time;",
        );
        assert!(matches!(reserved, Err(TemplateError::ReservedName { .. })));
    }

    #[test]
    fn parameterize_substitutes_and_declares() {
        let vgen = simple_vgen("@out = @a * @b;").unwrap();
        let fragment = vgen
            .parameterize(
                &["x".to_string(), "0.5".to_string()],
                &HashMap::new(),
                &["result".to_string()],
                &[2],
                &HashSet::new(),
            )
            .unwrap();
        assert_eq!("vec2 result = x * 0.5;", fragment);
    }

    #[test]
    fn parameterize_skips_declaration_when_already_declared() {
        let vgen = simple_vgen("@out = @a * @b;").unwrap();
        let declared: HashSet<String> = ["result".to_string()].into_iter().collect();
        let fragment = vgen
            .parameterize(
                &["x".to_string(), "y".to_string()],
                &HashMap::new(),
                &["result".to_string()],
                &[1],
                &declared,
            )
            .unwrap();
        assert_eq!("result = x * y;", fragment);
    }

    #[test]
    fn parameterize_with_placeholders_is_identity() {
        let source = "@out = length(@a) + @b * @pi;\n@out += @a.x;";
        let vgen = AbstractVGen::new(
            "Identity",
            Rates::PIXEL,
            false,
            vec!["a".to_string(), "b".to_string()],
            vec!["out".to_string()],
            vec![vec![2, 1]],
            vec![vec![1]],
            source,
        )
        .unwrap();
        let intrinsics: HashMap<Intrinsic, String> =
            [(Intrinsic::Pi, "@pi".to_string())].into_iter().collect();
        let declared: HashSet<String> = ["@out".to_string()].into_iter().collect();
        let fragment = vgen
            .parameterize(
                &["@a".to_string(), "@b".to_string()],
                &intrinsics,
                &["@out".to_string()],
                &[1],
                &declared,
            )
            .unwrap();
        assert_eq!(source, fragment);
    }

    #[test]
    fn unsupported_output_dimension_fails() {
        let vgen = simple_vgen("@out = @a + @b;").unwrap();
        let result = vgen.parameterize(
            &["x".to_string(), "y".to_string()],
            &HashMap::new(),
            &["r".to_string()],
            &[5],
            &HashSet::new(),
        );
        assert!(matches!(
            result,
            Err(TemplateError::UnsupportedDimension { .. })
        ));
    }
}
