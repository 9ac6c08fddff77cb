// sopgen — Sum-of-Products stage generator
//
// Library root. Front end (lexer, parser, resolve), numeric core (quantize,
// multiplier, tree, width_infer), backends (codegen, dot, report) and the
// checks that tie them together (eval, verify, wcpg), driven by `pipeline`.

pub mod ast;
pub mod codegen;
pub mod diag;
pub mod dot;
pub mod eval;
pub mod format;
pub mod id;
pub mod lexer;
pub mod multiplier;
pub mod parser;
pub mod pass;
pub mod pipeline;
pub mod quantize;
pub mod report;
pub mod resolve;
pub mod stage;
pub mod tree;
pub mod verify;
pub mod wcpg;
pub mod width_infer;
