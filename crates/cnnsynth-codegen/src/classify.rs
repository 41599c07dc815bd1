//! Classification post-processing on the host core.
//!
//! Two mutually exclusive backends: a fixed-point fully-connected layer
//! followed by softmax, or softmax applied directly to the accelerator
//! output. Golden-output verification compares the softmax input against
//! an expected array.

use serde::{Deserialize, Serialize};

use crate::array::{Array, ArraySerializer, MacroLiteral};
use crate::config::{OutputWidth, ResultRetrieval};
use crate::emitter::{FunctionSignature, Return, Sink};
use crate::error::{Result, SynthesisError};
use crate::op::{Callee, Operation};

/// Weight matrix of the classification layer, row-major
/// (`rows` = network outputs, `cols` = layer inputs).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FcWeights {
    pub rows: usize,
    pub cols: usize,
    pub values: Vec<i64>,
}

impl FcWeights {
    pub fn new(rows: usize, cols: usize, values: Vec<i64>) -> Result<Self> {
        let weights = Self { rows, cols, values };
        weights.check_shape()?;
        Ok(weights)
    }

    fn check_shape(&self) -> Result<()> {
        if self.rows.checked_mul(self.cols) != Some(self.values.len()) {
            return Err(SynthesisError::WeightShape {
                rows: self.rows,
                cols: self.cols,
                actual: self.values.len(),
            });
        }
        Ok(())
    }

    fn at(&self, row: usize, col: usize) -> i64 {
        self.values[row * self.cols + col]
    }
}

/// Converts trained weights into the layout the fixed-point kernel expects.
pub trait WeightConverter {
    fn convert(&self, weights: &FcWeights) -> Vec<i64>;
}

/// Interleaving used by `arm_fully_connected_q7_q8p7_opt`.
///
/// Rows are processed in blocks of four. Within a block, every four columns
/// are reordered so that the kernel can load two rows per 32-bit word;
/// leftover columns follow in order, and leftover rows are left untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct X4Interleave;

impl WeightConverter for X4Interleave {
    fn convert(&self, weights: &FcWeights) -> Vec<i64> {
        const ORDER: [(usize, usize); 16] = [
            (0, 0),
            (1, 0),
            (0, 2),
            (1, 2),
            (2, 0),
            (3, 0),
            (2, 2),
            (3, 2),
            (0, 1),
            (1, 1),
            (0, 3),
            (1, 3),
            (2, 1),
            (3, 1),
            (2, 3),
            (3, 3),
        ];

        let mut out = weights.values.clone();
        let mut counter = 0;
        for block in 0..weights.rows / 4 {
            let row_base = block * 4;
            for chunk in 0..weights.cols / 4 {
                let col_base = chunk * 4;
                for (row, col) in ORDER {
                    out[counter] = weights.at(row_base + row, col_base + col);
                    counter += 1;
                }
            }
            for col in weights.cols - weights.cols % 4..weights.cols {
                for row in 0..4 {
                    out[counter] = weights.at(row_base + row, col);
                    counter += 1;
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationBackend {
    FullyConnected,
    SoftmaxOnly,
}

impl ClassificationBackend {
    pub fn for_retrieval(retrieval: ResultRetrieval) -> Option<Self> {
        match retrieval {
            ResultRetrieval::Unload => None,
            ResultRetrieval::FullyConnected => Some(ClassificationBackend::FullyConnected),
            ResultRetrieval::SoftmaxOnly => Some(ClassificationBackend::SoftmaxOnly),
        }
    }

    /// Name of the emitted layer function.
    pub fn function_name(self) -> &'static str {
        match self {
            ClassificationBackend::FullyConnected => "fc_layer",
            ClassificationBackend::SoftmaxOnly => "softmax_layer",
        }
    }
}

/// A self-contained block of emitted code: file-scope declarations, one
/// function, and the literal definitions it depends on.
#[derive(Debug, Clone)]
pub struct ClassificationUnit {
    pub declarations: Vec<Operation>,
    pub signature: FunctionSignature,
    pub body: Vec<Operation>,
    pub ret: Return,
    /// `#define` blocks and the sink each belongs to.
    pub literals: Vec<(Sink, String)>,
}

/// Declaration of the buffer that receives unloaded accelerator output.
pub fn ml_data_declaration(width: OutputWidth) -> Operation {
    match width {
        OutputWidth::W32 => Operation::declare("static int32_t ml_data[CNN_NUM_OUTPUTS];"),
        _ => {
            let per_word = width.per_word();
            Operation::declare(format!(
                "static int32_t ml_data32[(CNN_NUM_OUTPUTS + {}) / {per_word}];",
                per_word - 1
            ))
        }
    }
}

/// `cnn_unload(...)` into the buffer declared by [`ml_data_declaration`].
pub fn unload_call(width: OutputWidth) -> Operation {
    let buffer = match width {
        OutputWidth::W32 => "(uint32_t *) ml_data",
        _ => "(uint32_t *) ml_data32",
    };
    Operation::call(Callee::external("cnn_unload"), &[buffer])
}

pub struct ClassificationEmitter<'a> {
    converter: &'a dyn WeightConverter,
    serializer: &'a dyn ArraySerializer,
    output_width: OutputWidth,
}

impl<'a> ClassificationEmitter<'a> {
    pub fn new(output_width: OutputWidth) -> Self {
        Self {
            converter: &X4Interleave,
            serializer: &MacroLiteral,
            output_width,
        }
    }

    pub fn with_converter(mut self, converter: &'a dyn WeightConverter) -> Self {
        self.converter = converter;
        self
    }

    pub fn with_serializer(mut self, serializer: &'a dyn ArraySerializer) -> Self {
        self.serializer = serializer;
        self
    }

    /// Emit the classification layer for `backend`.
    pub fn emit(
        &self,
        weights: Option<&FcWeights>,
        bias: Option<&[i64]>,
        backend: ClassificationBackend,
    ) -> Result<ClassificationUnit> {
        match backend {
            ClassificationBackend::FullyConnected => {
                let weights = weights.ok_or(SynthesisError::MissingInput {
                    input: "fully-connected weights",
                })?;
                self.fully_connected(weights, bias)
            }
            ClassificationBackend::SoftmaxOnly => {
                if weights.is_some() || bias.is_some() {
                    tracing::debug!("softmax-only backend ignores supplied weights and bias");
                }
                Ok(self.softmax_only())
            }
        }
    }

    fn fully_connected(&self, weights: &FcWeights, bias: Option<&[i64]>) -> Result<ClassificationUnit> {
        weights.check_shape()?;

        let converted = self.converter.convert(weights);
        let mut literals = vec![(
            Sink::Weights,
            self.serializer
                .serialize(&Array::new("FC_WEIGHTS", converted, "%d", 16)?),
        )];

        let mut declarations = vec![
            Operation::comment("Classification layer:"),
            Operation::define("FC_IN", weights.cols),
            Operation::declare("static const q7_t fc_weights[] = FC_WEIGHTS;"),
            Operation::Blank,
            ml_data_declaration(self.output_width),
            Operation::declare("static q15_t fc_buffer[FC_IN];"),
            Operation::declare("static q15_t fc_output[CNN_NUM_OUTPUTS];"),
            Operation::declare("static q15_t ml_softmax[CNN_NUM_OUTPUTS];"),
            Operation::Blank,
        ];
        if let Some(bias) = bias {
            literals.push((
                Sink::Weights,
                self.serializer
                    .serialize(&Array::new("FC_BIAS", bias.to_vec(), "%d", 16)?),
            ));
            declarations.push(Operation::declare(
                "static const q7_t fc_bias[] = FC_BIAS;",
            ));
            declarations.push(Operation::Blank);
        }

        let body = vec![
            unload_call(self.output_width),
            Operation::call(
                Callee::external("arm_fully_connected_q7_q8p7_opt"),
                &[
                    match self.output_width {
                        OutputWidth::W32 => "(q7_t *) ml_data",
                        OutputWidth::W8 | OutputWidth::W16 => "(q7_t *) ml_data32",
                    },
                    "fc_weights",
                    "FC_IN",
                    "CNN_NUM_OUTPUTS",
                    "0",
                    "7",
                    if bias.is_some() { "fc_bias" } else { "NULL" },
                    "fc_output",
                    "fc_buffer",
                ],
            ),
            Operation::call(
                Callee::external("arm_softmax_q8p7_q15"),
                &["fc_output", "CNN_NUM_OUTPUTS", "ml_softmax"],
            ),
        ];

        Ok(ClassificationUnit {
            declarations,
            signature: FunctionSignature::void(ClassificationBackend::FullyConnected.function_name()),
            body,
            ret: Return::Void,
            literals,
        })
    }

    fn softmax_only(&self) -> ClassificationUnit {
        let declarations = vec![
            Operation::comment("Classification layer:"),
            ml_data_declaration(self.output_width),
            Operation::declare("static q15_t ml_softmax[CNN_NUM_OUTPUTS];"),
            Operation::Blank,
        ];
        let kernel = match self.output_width {
            OutputWidth::W32 => Operation::call(
                Callee::external("softmax_q17p14_q15"),
                &["(const q31_t *) ml_data", "CNN_NUM_OUTPUTS", "ml_softmax"],
            ),
            OutputWidth::W8 | OutputWidth::W16 => Operation::call(
                Callee::external("arm_softmax_q7_q15"),
                &["(const q7_t *) ml_data32", "CNN_NUM_OUTPUTS", "ml_softmax"],
            ),
        };
        ClassificationUnit {
            declarations,
            signature: FunctionSignature::void(ClassificationBackend::SoftmaxOnly.function_name()),
            body: vec![unload_call(self.output_width), kernel],
            ret: Return::Void,
            literals: Vec::new(),
        }
    }

    /// Emit `fc_verify()`, comparing the layer output against `expected`.
    pub fn emit_verify(&self, expected: &[i64]) -> Result<ClassificationUnit> {
        let literal = self
            .serializer
            .serialize(&Array::new("FC_EXPECTED", expected.to_vec(), "%d", 16)?);
        Ok(ClassificationUnit {
            declarations: vec![
                Operation::comment("Expected output of classification layer:"),
                Operation::declare("static q15_t fc_expected[CNN_NUM_OUTPUTS] = FC_EXPECTED;"),
                Operation::Blank,
            ],
            signature: FunctionSignature::int("fc_verify"),
            body: Vec::new(),
            ret: Return::value(
                "memcmp(fc_output, fc_expected, CNN_NUM_OUTPUTS * sizeof(q15_t)) == 0",
            ),
            literals: vec![(Sink::SampleData, literal)],
        })
    }
}
