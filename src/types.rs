//! Canonical type system
//!
//! Mirrors the original `ASTType`/`TypeSystem` (`compiler.hpp`): scalars are
//! process-wide singletons, vectors/matrices are pre-interned in a fixed
//! table per element kind, arrays and structs are hash-consed per `TypeTable`
//! (linear scan, same as the original `GetArrayType`). Equality between two
//! `TypeId`s is identity equality into that table, exactly as the invariant
//! in spec.md section 3(i) requires.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scalar {
    Bool,
    Int32,
    UInt32,
    Float16,
    Float32,
}

impl Scalar {
    /// Promotion order from spec.md section 4.3: "bool < int32 < uint32 <
    /// float16 < float32".
    pub fn rank(self) -> u8 {
        match self {
            Scalar::Bool => 0,
            Scalar::Int32 => 1,
            Scalar::UInt32 => 2,
            Scalar::Float16 => 3,
            Scalar::Float32 => 4,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, Scalar::Float16 | Scalar::Float32)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Scalar::Bool => "bool",
            Scalar::Int32 => "int",
            Scalar::UInt32 => "uint",
            Scalar::Float16 => "half",
            Scalar::Float32 => "float",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplerKind {
    Sampler1D,
    Sampler2D,
    Sampler3D,
    SamplerCube,
    Sampler1DCmp,
    Sampler2DCmp,
    SamplerCubeCmp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructMember {
    pub name: String,
    pub ty: TypeId,
    pub semantic_name: Option<String>,
    pub semantic_index: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Void,
    Scalar(Scalar),
    /// Width 1 is legal; kept distinct rather than collapsed to a scalar,
    /// per spec.md's Open Question (iii) — later generator stages decide
    /// whether to special-case it.
    Vector(TypeId, u8),
    Matrix(TypeId, u8, u8),
    Array(TypeId, u32),
    Structure(String, Vec<StructMember>),
    Function,
    Sampler(SamplerKind),
}

impl Type {
    pub fn is_numeric(&self, table: &TypeTable) -> bool {
        match self {
            Type::Scalar(_) => true,
            Type::Vector(sub, _) | Type::Matrix(sub, _, _) => table.get(*sub).is_numeric(table),
            _ => false,
        }
    }

    pub fn is_indexable(&self) -> bool {
        matches!(self, Type::Vector(..) | Type::Matrix(..) | Type::Array(..))
    }

    pub fn is_sampler(&self) -> bool {
        matches!(self, Type::Sampler(_))
    }

    /// Element count, i.e. the access-point count before recursing into
    /// struct members (spec.md section 3 invariant iii, GLOSSARY
    /// "Access point").
    pub fn element_count(&self) -> u32 {
        match self {
            Type::Void | Type::Function | Type::Sampler(_) => 1,
            Type::Scalar(_) => 1,
            Type::Vector(_, w) => *w as u32,
            Type::Matrix(_, r, c) => *r as u32 * *c as u32,
            Type::Array(_, n) => *n,
            Type::Structure(_, members) => members.len() as u32,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Scalar(s) => write!(f, "{s}"),
            Type::Vector(_, w) => write!(f, "vec{w}"),
            Type::Matrix(_, r, c) => write!(f, "mat{r}x{c}"),
            Type::Array(_, n) => write!(f, "array[{n}]"),
            Type::Structure(name, _) => write!(f, "struct {name}"),
            Type::Function => write!(f, "function"),
            Type::Sampler(k) => write!(
                f,
                "{}",
                match k {
                    SamplerKind::Sampler1D => "sampler1D",
                    SamplerKind::Sampler2D => "sampler2D",
                    SamplerKind::Sampler3D => "sampler3D",
                    SamplerKind::SamplerCube => "samplerCube",
                    SamplerKind::Sampler1DCmp => "sampler1DShadow",
                    SamplerKind::Sampler2DCmp => "sampler2DShadow",
                    SamplerKind::SamplerCubeCmp => "samplerCubeShadow",
                }
            ),
        }
    }
}

/// Owns every canonical type reachable from one AST. Scalars and the full
/// vector/matrix table are interned at construction; arrays and structs are
/// added lazily and deduplicated by linear scan, matching the original
/// `TypeSystem::GetArrayType` ("linear scan of existing array types").
pub struct TypeTable {
    types: Vec<Type>,
    scalar_ids: [TypeId; 5],
    void_id: TypeId,
    vector_ids: [[Option<TypeId>; 4]; 5],
    matrix_ids: [[[Option<TypeId>; 4]; 4]; 5],
}

const SCALARS: [Scalar; 5] = [
    Scalar::Bool,
    Scalar::Int32,
    Scalar::UInt32,
    Scalar::Float16,
    Scalar::Float32,
];

impl TypeTable {
    pub fn new() -> Self {
        let mut types = Vec::new();
        types.push(Type::Void);
        let void_id = TypeId(0);

        let mut scalar_ids = [TypeId(0); 5];
        for (i, s) in SCALARS.iter().enumerate() {
            scalar_ids[i] = TypeId(types.len() as u32);
            types.push(Type::Scalar(*s));
        }

        let mut vector_ids: [[Option<TypeId>; 4]; 5] = [[None; 4]; 5];
        for (i, _) in SCALARS.iter().enumerate() {
            for w in 1..=4u8 {
                let id = TypeId(types.len() as u32);
                types.push(Type::Vector(scalar_ids[i], w));
                vector_ids[i][(w - 1) as usize] = Some(id);
            }
        }

        let mut matrix_ids: [[[Option<TypeId>; 4]; 4]; 5] = [[[None; 4]; 4]; 5];
        for (i, _) in SCALARS.iter().enumerate() {
            for r in 1..=4u8 {
                for c in 1..=4u8 {
                    let id = TypeId(types.len() as u32);
                    types.push(Type::Matrix(scalar_ids[i], r, c));
                    matrix_ids[i][(r - 1) as usize][(c - 1) as usize] = Some(id);
                }
            }
        }

        TypeTable {
            types,
            scalar_ids,
            void_id,
            vector_ids,
            matrix_ids,
        }
    }

    pub fn void(&self) -> TypeId {
        self.void_id
    }

    pub fn scalar(&self, s: Scalar) -> TypeId {
        self.scalar_ids[scalar_index(s)]
    }

    pub fn get_vector_type(&self, elem: Scalar, width: u8) -> TypeId {
        debug_assert!((1..=4).contains(&width));
        self.vector_ids[scalar_index(elem)][(width - 1) as usize]
            .expect("vector table fully pre-interned")
    }

    pub fn get_matrix_type(&self, elem: Scalar, rows: u8, cols: u8) -> TypeId {
        debug_assert!((1..=4).contains(&rows) && (1..=4).contains(&cols));
        self.matrix_ids[scalar_index(elem)][(rows - 1) as usize][(cols - 1) as usize]
            .expect("matrix table fully pre-interned")
    }

    pub fn get_array_type(&mut self, elem: TypeId, count: u32) -> TypeId {
        for (i, t) in self.types.iter().enumerate() {
            if let Type::Array(e, n) = t {
                if *e == elem && *n == count {
                    return TypeId(i as u32);
                }
            }
        }
        let id = TypeId(self.types.len() as u32);
        self.types.push(Type::Array(elem, count));
        id
    }

    /// Structures are nominal, not structural: always creates a fresh
    /// canonical instance, matching `CreateStructType` in the original.
    pub fn create_struct_type(&mut self, name: impl Into<String>, members: Vec<StructMember>) -> TypeId {
        let total = members
            .iter()
            .map(|m| self.get(m.ty).element_count())
            .sum::<u32>();
        let _ = total; // recomputed via total_access_point_count below
        let id = TypeId(self.types.len() as u32);
        self.types.push(Type::Structure(name.into(), members));
        id
    }

    /// Samplers are interned like arrays: one canonical `TypeId` per kind,
    /// found by linear scan and created lazily on first use.
    pub fn get_sampler_type(&mut self, kind: SamplerKind) -> TypeId {
        for (i, t) in self.types.iter().enumerate() {
            if let Type::Sampler(k) = t {
                if *k == kind {
                    return TypeId(i as u32);
                }
            }
        }
        let id = TypeId(self.types.len() as u32);
        self.types.push(Type::Sampler(kind));
        id
    }

    pub fn total_access_point_count(&self, id: TypeId) -> u32 {
        match self.get(id) {
            Type::Structure(_, members) => members.iter().map(|m| self.total_access_point_count(m.ty)).sum(),
            other => other.element_count(),
        }
    }

    pub fn get(&self, id: TypeId) -> &Type {
        &self.types[id.0 as usize]
    }

    pub fn sub_type(&self, id: TypeId) -> Option<TypeId> {
        match self.get(id) {
            Type::Vector(s, _) | Type::Matrix(s, _, _) => Some(*s),
            _ => None,
        }
    }

    fn scalar_of(&self, id: TypeId) -> Option<Scalar> {
        match self.get(id) {
            Type::Scalar(s) => Some(*s),
            _ => None,
        }
    }

    /// `can_cast` per spec.md section 4.3 rules 1-7.
    pub fn can_cast(&self, from: TypeId, to: TypeId, explicit: bool) -> bool {
        if from == to {
            return true; // rule 1
        }
        let (ft, tt) = (self.get(from), self.get(to));
        match (ft, tt) {
            // rule 2: any two numeric scalars
            (Type::Scalar(_), Type::Scalar(_)) => true,
            // rule 3: scalar <-> vector/matrix of same shape, broadcast
            (Type::Scalar(fs), Type::Vector(sub, _)) | (Type::Scalar(fs), Type::Matrix(sub, _, _)) => {
                self.scalar_of(*sub).is_some_and(|ts| self.scalars_castable(*fs, ts))
            }
            (Type::Vector(sub, _), Type::Scalar(ts)) | (Type::Matrix(sub, _, _), Type::Scalar(ts)) => {
                self.scalar_of(*sub).is_some_and(|fs| self.scalars_castable(fs, *ts))
                    && explicit
                    && ft.element_count() == 1 // rule 5: only collapses of size 1
            }
            // rule 4: vector/matrix to vector/matrix of the same shape
            (Type::Vector(fsub, fw), Type::Vector(tsub, tw)) if fw == tw => {
                self.scalar_of(*fsub)
                    .zip(self.scalar_of(*tsub))
                    .is_some_and(|(a, b)| self.scalars_castable(a, b))
            }
            (Type::Matrix(fsub, fr, fc), Type::Matrix(tsub, tr, tc)) if fr == tr && fc == tc => {
                self.scalar_of(*fsub)
                    .zip(self.scalar_of(*tsub))
                    .is_some_and(|(a, b)| self.scalars_castable(a, b))
            }
            // rule 6: struct <-> struct, numeric and matching access-point counts, explicit only
            (Type::Structure(..), Type::Structure(..)) if explicit => {
                ft.is_numeric(self) && tt.is_numeric(self) && self.total_access_point_count(from) == self.total_access_point_count(to)
            }
            _ => false, // rule 7
        }
    }

    fn scalars_castable(&self, _a: Scalar, _b: Scalar) -> bool {
        true // rule 2: any two numeric scalars may always cast
    }

    /// `promote` per spec.md section 4.3: widest scalar wins; matching
    /// vector/matrix shapes promote element type and keep shape; mismatched
    /// shapes fail.
    pub fn promote(&mut self, a: TypeId, b: TypeId) -> Option<TypeId> {
        if a == b {
            return Some(a);
        }
        match (self.get(a).clone(), self.get(b).clone()) {
            (Type::Scalar(sa), Type::Scalar(sb)) => {
                let winner = if sa.rank() >= sb.rank() { sa } else { sb };
                Some(self.scalar(winner))
            }
            (Type::Vector(sa, wa), Type::Vector(sb, wb)) if wa == wb => {
                let ea = self.scalar_of(sa)?;
                let eb = self.scalar_of(sb)?;
                let winner = if ea.rank() >= eb.rank() { ea } else { eb };
                Some(self.get_vector_type(winner, wa))
            }
            (Type::Matrix(sa, ra, ca), Type::Matrix(sb, rb, cb)) if ra == rb && ca == cb => {
                let ea = self.scalar_of(sa)?;
                let eb = self.scalar_of(sb)?;
                let winner = if ea.rank() >= eb.rank() { ea } else { eb };
                Some(self.get_matrix_type(winner, ra, ca))
            }
            _ => None,
        }
    }
}

impl Default for TypeTable {
    fn default() -> Self {
        Self::new()
    }
}

fn scalar_index(s: Scalar) -> usize {
    SCALARS.iter().position(|x| *x == s).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_are_singletons() {
        let t = TypeTable::new();
        assert_eq!(t.scalar(Scalar::Float32), t.scalar(Scalar::Float32));
        assert_ne!(t.scalar(Scalar::Float32), t.scalar(Scalar::Int32));
    }

    #[test]
    fn vector_table_is_preinterned() {
        let t = TypeTable::new();
        let v1 = t.get_vector_type(Scalar::Float32, 4);
        let v2 = t.get_vector_type(Scalar::Float32, 4);
        assert_eq!(v1, v2);
        assert_eq!(t.sub_type(v1), Some(t.scalar(Scalar::Float32)));
    }

    #[test]
    fn array_type_is_hash_consed() {
        let mut t = TypeTable::new();
        let f32_ty = t.scalar(Scalar::Float32);
        let a1 = t.get_array_type(f32_ty, 8);
        let a2 = t.get_array_type(f32_ty, 8);
        let a3 = t.get_array_type(f32_ty, 9);
        assert_eq!(a1, a2);
        assert_ne!(a1, a3);
    }

    #[test]
    fn struct_type_is_always_distinct() {
        let mut t = TypeTable::new();
        let f32_ty = t.scalar(Scalar::Float32);
        let members = vec![StructMember {
            name: "x".into(),
            ty: f32_ty,
            semantic_name: None,
            semantic_index: -1,
        }];
        let s1 = t.create_struct_type("S", members.clone());
        let s2 = t.create_struct_type("S", members);
        assert_ne!(s1, s2, "structures are nominal, never deduplicated");
    }

    #[test]
    fn cast_rules_scalar_to_vector_broadcast() {
        let t = TypeTable::new();
        let f32_ty = t.scalar(Scalar::Float32);
        let v4 = t.get_vector_type(Scalar::Float32, 4);
        assert!(t.can_cast(f32_ty, v4, false));
    }

    #[test]
    fn cast_rules_vector_to_scalar_requires_explicit_and_width_one() {
        let t = TypeTable::new();
        let f32_ty = t.scalar(Scalar::Float32);
        let v1 = t.get_vector_type(Scalar::Float32, 1);
        let v4 = t.get_vector_type(Scalar::Float32, 4);
        assert!(t.can_cast(v1, f32_ty, true));
        assert!(!t.can_cast(v1, f32_ty, false));
        assert!(!t.can_cast(v4, f32_ty, true));
    }

    #[test]
    fn promote_picks_wider_scalar() {
        let mut t = TypeTable::new();
        let i32_ty = t.scalar(Scalar::Int32);
        let f32_ty = t.scalar(Scalar::Float32);
        assert_eq!(t.promote(i32_ty, f32_ty), Some(f32_ty));
    }

    #[test]
    fn promote_fails_on_mismatched_vector_width() {
        let mut t = TypeTable::new();
        let v2 = t.get_vector_type(Scalar::Float32, 2);
        let v3 = t.get_vector_type(Scalar::Float32, 3);
        assert_eq!(t.promote(v2, v3), None);
    }

    #[test]
    fn total_access_point_count_recurses_into_members() {
        let mut t = TypeTable::new();
        let f32_ty = t.scalar(Scalar::Float32);
        let v3 = t.get_vector_type(Scalar::Float32, 3);
        let members = vec![
            StructMember {
                name: "a".into(),
                ty: v3,
                semantic_name: None,
                semantic_index: -1,
            },
            StructMember {
                name: "b".into(),
                ty: f32_ty,
                semantic_name: None,
                semantic_index: -1,
            },
        ];
        let s = t.create_struct_type("S", members);
        assert_eq!(t.total_access_point_count(s), 4);
    }
}
