//! Built-in intrinsic signature table
//!
//! Table-driven overload database for the `OpKind` intrinsics, grounded on
//! the original `OpKind` enumeration (`compiler.hpp`) for the op list and on
//! the teacher's `builtin_signatures()` (`builtins.rs`) for the
//! `HashMap<String, Vec<Signature>>` shape: each name maps to every overload
//! visible under it, mirroring the original's
//! `unordered_map<String, Array<ASTFunction*>>` (`hlslparser.hpp`).

use crate::ast::OpKind;
use crate::types::{SamplerKind, Scalar, TypeId, TypeTable};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Signature {
    pub op_kind: OpKind,
    pub params: Vec<TypeId>,
    pub return_type: TypeId,
}

pub struct BuiltinTable {
    by_name: HashMap<&'static str, Vec<Signature>>,
}

macro_rules! sig {
    ($table:expr, $types:expr, $name:expr, $op:expr, [$($p:expr),*], $ret:expr) => {
        $table.entry($name).or_insert_with(Vec::new).push(Signature {
            op_kind: $op,
            params: vec![$($p),*],
            return_type: $ret,
        });
    };
}

impl BuiltinTable {
    pub fn build(types: &mut TypeTable) -> Self {
        let mut by_name: HashMap<&'static str, Vec<Signature>> = HashMap::new();
        let f32_ty = types.scalar(Scalar::Float32);
        let i32_ty = types.scalar(Scalar::Int32);

        // unary float -> float (trig, exponential, rounding)
        for (name, op) in [
            ("sin", OpKind::Sin),
            ("cos", OpKind::Cos),
            ("tan", OpKind::Tan),
            ("asin", OpKind::ASin),
            ("acos", OpKind::ACos),
            ("atan", OpKind::ATan),
            ("sqrt", OpKind::Sqrt),
            ("rsqrt", OpKind::RSqrt),
            ("exp", OpKind::Exp),
            ("exp2", OpKind::Exp2),
            ("log", OpKind::Log),
            ("log2", OpKind::Log2),
            ("saturate", OpKind::Saturate),
            ("floor", OpKind::Floor),
            ("ceil", OpKind::Ceil),
            ("frac", OpKind::Frac),
            ("abs", OpKind::Abs),
            ("normalize", OpKind::Normalize),
        ] {
            for w in 1..=4u8 {
                let v = types.get_vector_type(Scalar::Float32, w);
                sig!(by_name, types, name, op, [v], v);
            }
            sig!(by_name, types, name, op, [f32_ty], f32_ty);
        }

        for w in 1..=4u8 {
            let v = types.get_vector_type(Scalar::Float32, w);
            sig!(by_name, types, "length", OpKind::Length, [v], f32_ty);
        }

        for (name, op) in [("min", OpKind::Min), ("max", OpKind::Max), ("atan2", OpKind::ATan2), ("pow", OpKind::Pow)] {
            sig!(by_name, types, name, op, [f32_ty, f32_ty], f32_ty);
            sig!(by_name, types, name, op, [i32_ty, i32_ty], i32_ty);
            for w in 1..=4u8 {
                let v = types.get_vector_type(Scalar::Float32, w);
                sig!(by_name, types, name, op, [v, v], v);
            }
        }

        sig!(by_name, types, "clamp", OpKind::Clamp, [f32_ty, f32_ty, f32_ty], f32_ty);
        sig!(by_name, types, "lerp", OpKind::Lerp, [f32_ty, f32_ty, f32_ty], f32_ty);
        for w in 1..=4u8 {
            let v = types.get_vector_type(Scalar::Float32, w);
            sig!(by_name, types, "clamp", OpKind::Clamp, [v, v, v], v);
            sig!(by_name, types, "lerp", OpKind::Lerp, [v, v, v], v);
        }

        for w in 1..=4u8 {
            let v = types.get_vector_type(Scalar::Float32, w);
            sig!(by_name, types, "dot", OpKind::Dot, [v, v], f32_ty);
        }
        let v3 = types.get_vector_type(Scalar::Float32, 3);
        sig!(by_name, types, "cross", OpKind::Cross, [v3, v3], v3);

        // texture sampling, spec.md section 2 "Sampler{1D,2D,3D,Cube}".
        let v2 = types.get_vector_type(Scalar::Float32, 2);
        let v4 = types.get_vector_type(Scalar::Float32, 4);
        let s1d = types.get_sampler_type(SamplerKind::Sampler1D);
        let s2d = types.get_sampler_type(SamplerKind::Sampler2D);
        let s3d = types.get_sampler_type(SamplerKind::Sampler3D);
        let scube = types.get_sampler_type(SamplerKind::SamplerCube);
        let s1dcmp = types.get_sampler_type(SamplerKind::Sampler1DCmp);
        let s2dcmp = types.get_sampler_type(SamplerKind::Sampler2DCmp);
        let scubecmp = types.get_sampler_type(SamplerKind::SamplerCubeCmp);

        sig!(by_name, types, "tex1D", OpKind::Tex1D, [s1d, f32_ty], v4);
        sig!(by_name, types, "tex2D", OpKind::Tex2D, [s2d, v2], v4);
        sig!(by_name, types, "tex3D", OpKind::Tex3D, [s3d, v3], v4);
        sig!(by_name, types, "texCUBE", OpKind::TexCube, [scube, v3], v4);

        sig!(by_name, types, "tex1Dlod", OpKind::Tex1DLOD, [s1d, v4], v4);
        sig!(by_name, types, "tex2Dlod", OpKind::Tex2DLOD, [s2d, v4], v4);
        sig!(by_name, types, "tex3Dlod", OpKind::Tex3DLOD, [s3d, v4], v4);
        sig!(by_name, types, "texCUBElod", OpKind::TexCubeLOD, [scube, v4], v4);

        sig!(by_name, types, "tex1Dcmp", OpKind::Tex1DCmp, [s1dcmp, f32_ty, f32_ty], f32_ty);
        sig!(by_name, types, "tex2Dcmp", OpKind::Tex2DCmp, [s2dcmp, v2, f32_ty], f32_ty);
        sig!(by_name, types, "texCUBEcmp", OpKind::TexCubeCmp, [scubecmp, v3, f32_ty], f32_ty);

        by_name.retain(|_, v| !v.is_empty());
        BuiltinTable { by_name }
    }

    pub fn lookup(&self, name: &str) -> Option<&[Signature]> {
        self.by_name.get(name).map(|v| v.as_slice())
    }

    pub fn is_builtin_name(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }
}

/// Sum of per-argument implicit-cast costs, spec.md section 4.4: "0 = exact,
/// 1 = same kind different width/sign, 2 = numeric narrowing/widening, 3 =
/// scalar-to-vector broadcast, reject if no cast". Returns `None` when any
/// argument has no valid cast to its parameter type.
pub fn match_factor(types: &TypeTable, params: &[TypeId], args: &[TypeId]) -> Option<u32> {
    if params.len() != args.len() {
        return None;
    }
    let mut total = 0u32;
    for (p, a) in params.iter().zip(args) {
        total += arg_cast_cost(types, *a, *p)?;
    }
    Some(total)
}

fn arg_cast_cost(types: &TypeTable, from: TypeId, to: TypeId) -> Option<u32> {
    if from == to {
        return Some(0);
    }
    if !types.can_cast(from, to, false) {
        return None;
    }
    use crate::types::Type::*;
    match (types.get(from), types.get(to)) {
        (Scalar(a), Scalar(b)) => {
            if a == b {
                Some(0)
            } else if a.is_float() == b.is_float() {
                Some(1) // same kind, different width/sign
            } else {
                Some(2) // numeric narrowing/widening across float/int
            }
        }
        (Scalar(_), Vector(..)) | (Scalar(_), Matrix(..)) => Some(3), // broadcast
        (Vector(_, wa), Vector(_, wb)) if wa == wb => Some(1),
        (Matrix(_, ra, ca), Matrix(_, rb, cb)) if ra == rb && ca == cb => Some(1),
        _ => Some(2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unary_float_intrinsics_registered_for_scalar_and_vectors() {
        let mut types = TypeTable::new();
        let table = BuiltinTable::build(&mut types);
        let sigs = table.lookup("sin").expect("sin should be registered");
        assert!(sigs.len() >= 5); // scalar + widths 1..4
    }

    #[test]
    fn texture_sampling_intrinsics_registered() {
        let mut types = TypeTable::new();
        let table = BuiltinTable::build(&mut types);
        assert!(table.lookup("tex2D").is_some());
        assert!(table.lookup("texCUBEcmp").is_some());
    }

    #[test]
    fn match_factor_exact_match_is_zero() {
        let types = TypeTable::new();
        let f32_ty = types.scalar(Scalar::Float32);
        assert_eq!(match_factor(&types, &[f32_ty], &[f32_ty]), Some(0));
    }

    #[test]
    fn match_factor_broadcast_costs_three() {
        let types = TypeTable::new();
        let f32_ty = types.scalar(Scalar::Float32);
        let v4 = types.get_vector_type(Scalar::Float32, 4);
        assert_eq!(match_factor(&types, &[v4], &[f32_ty]), Some(3));
    }

    #[test]
    fn match_factor_rejects_incompatible_shapes() {
        let types = TypeTable::new();
        let v2 = types.get_vector_type(Scalar::Float32, 2);
        let v3 = types.get_vector_type(Scalar::Float32, 3);
        assert_eq!(match_factor(&types, &[v3], &[v2]), None);
    }
}
