//! Real types: the canonical semantic types produced by type evaluation.
//!
//! Types live in an arena (`TypeStore`) and reference each other by
//! `TypeId`, which is what lets recursive named types close their cycles:
//! evaluating `type T = (next: *T, v: i32)` installs a `Placeholder` slot
//! for `T`, evaluates the struct against it, then patches the slot in
//! place, so every id handed out during evaluation ends up pointing at the
//! final content.
//!
//! Equality is structural and cycle-tolerant: struct/union comparisons keep
//! a visited-pair set, and `GenericToInfer` compares equal to anything.

use std::fmt::Write as _;

/// Index of a type in the [`TypeStore`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub enum RealType {
    Int { signed: bool, bits: u32 },
    Float { bits: u32 },
    Void,
    Ptr { is_mut: bool, target: TypeId },
    StaticArray { len: u64, elem: TypeId },
    StaticVector { len: u64, elem: TypeId },
    Struct { fields: Vec<(String, TypeId)> },
    Union { fields: Vec<(String, TypeId)> },
    Fn { args: Vec<TypeId>, ret: TypeId },
    /// Fix-point handle: a named type currently being evaluated. Patched in
    /// place once the underlying type is known.
    Placeholder,
    /// A generic signature slot awaiting monomorphisation. Compares equal
    /// to every type.
    GenericToInfer(u32),
}

pub struct TypeStore {
    types: Vec<RealType>,
    /// The shared, never-patched placeholder used as the "no expectation"
    /// context type.
    pub placeholder: TypeId,
    pub void: TypeId,
    ints: [TypeId; 8],
    floats: [TypeId; 2],
    /// `*u8`, the null-terminated string type.
    pub cstring: TypeId,
    /// `(ptr: *u8, len: u64)`, the fat-pointer string type.
    pub string: TypeId,
}

impl TypeStore {
    pub fn new() -> Self {
        let mut types = Vec::new();
        let mut alloc = |rt: RealType| {
            types.push(rt);
            TypeId(types.len() as u32 - 1)
        };

        let placeholder = alloc(RealType::Placeholder);
        let void = alloc(RealType::Void);

        let mut ints = [TypeId(0); 8];
        for (i, (signed, bits)) in [
            (true, 8),
            (true, 16),
            (true, 32),
            (true, 64),
            (false, 8),
            (false, 16),
            (false, 32),
            (false, 64),
        ]
        .into_iter()
        .enumerate()
        {
            ints[i] = alloc(RealType::Int { signed, bits });
        }

        let floats = [
            alloc(RealType::Float { bits: 32 }),
            alloc(RealType::Float { bits: 64 }),
        ];

        let u8_id = ints[4];
        let u64_id = ints[7];
        let cstring = alloc(RealType::Ptr { is_mut: false, target: u8_id });
        let string = alloc(RealType::Struct {
            fields: vec![("ptr".to_string(), cstring), ("len".to_string(), u64_id)],
        });

        Self {
            types,
            placeholder,
            void,
            ints,
            floats,
            cstring,
            string,
        }
    }

    pub fn alloc(&mut self, rt: RealType) -> TypeId {
        self.types.push(rt);
        TypeId(self.types.len() as u32 - 1)
    }

    /// A fresh placeholder slot for a named type under evaluation.
    pub fn fresh_placeholder(&mut self) -> TypeId {
        self.alloc(RealType::Placeholder)
    }

    /// Patch a placeholder slot with its final content; every id that
    /// already references the slot sees the update.
    pub fn patch(&mut self, id: TypeId, content: RealType) {
        self.types[id.0 as usize] = content;
    }

    pub fn get(&self, id: TypeId) -> &RealType {
        &self.types[id.0 as usize]
    }

    pub fn int_ty(&self, signed: bool, bits: u32) -> TypeId {
        let offset = match bits {
            8 => 0,
            16 => 1,
            32 => 2,
            64 => 3,
            _ => unreachable!("no such integer width: {bits}"),
        };
        self.ints[if signed { offset } else { offset + 4 }]
    }

    pub fn float_ty(&self, bits: u32) -> TypeId {
        match bits {
            32 => self.floats[0],
            64 => self.floats[1],
            _ => unreachable!("no such float width: {bits}"),
        }
    }

    pub fn u8(&self) -> TypeId {
        self.int_ty(false, 8)
    }

    pub fn u64(&self) -> TypeId {
        self.int_ty(false, 64)
    }

    pub fn i32(&self) -> TypeId {
        self.int_ty(true, 32)
    }

    pub fn u32(&self) -> TypeId {
        self.int_ty(false, 32)
    }

    pub fn f32(&self) -> TypeId {
        self.float_ty(32)
    }

    // ── Predicates ─────────────────────────────────────────────────────

    pub fn is_int(&self, id: TypeId) -> bool {
        matches!(self.get(id), RealType::Int { .. })
    }

    pub fn is_float(&self, id: TypeId) -> bool {
        matches!(self.get(id), RealType::Float { .. })
    }

    pub fn is_numeric(&self, id: TypeId) -> bool {
        self.is_int(id) || self.is_float(id)
    }

    pub fn is_void(&self, id: TypeId) -> bool {
        matches!(self.get(id), RealType::Void)
    }

    pub fn is_ptr(&self, id: TypeId) -> bool {
        matches!(self.get(id), RealType::Ptr { .. })
    }

    pub fn is_struct(&self, id: TypeId) -> bool {
        matches!(self.get(id), RealType::Struct { .. })
    }

    pub fn is_union(&self, id: TypeId) -> bool {
        matches!(self.get(id), RealType::Union { .. })
    }

    pub fn is_static_array(&self, id: TypeId) -> bool {
        matches!(self.get(id), RealType::StaticArray { .. })
    }

    pub fn is_vector(&self, id: TypeId) -> bool {
        matches!(self.get(id), RealType::StaticVector { .. })
    }

    pub fn is_indexable(&self, id: TypeId) -> bool {
        self.is_ptr(id) || self.is_static_array(id)
    }

    pub fn is_placeholder(&self, id: TypeId) -> bool {
        matches!(self.get(id), RealType::Placeholder)
    }

    /// Bit width of a numeric type.
    pub fn bits(&self, id: TypeId) -> u32 {
        match self.get(id) {
            RealType::Int { bits, .. } | RealType::Float { bits } => *bits,
            rt => unreachable!("bits requested on non-numeric type {rt:?}"),
        }
    }

    /// Signedness of an integer type. Non-integers count as signed, which
    /// matches how comparisons on pointers pick their predicate.
    pub fn is_signed(&self, id: TypeId) -> bool {
        match self.get(id) {
            RealType::Int { signed, .. } => *signed,
            _ => true,
        }
    }

    /// Pointee / element type of a pointer, array or vector.
    pub fn elem_of(&self, id: TypeId) -> TypeId {
        match self.get(id) {
            RealType::Ptr { target, .. } => *target,
            RealType::StaticArray { elem, .. } | RealType::StaticVector { elem, .. } => *elem,
            rt => unreachable!("elem_of on {rt:?}"),
        }
    }

    pub fn ptr_is_mut(&self, id: TypeId) -> bool {
        match self.get(id) {
            RealType::Ptr { is_mut, .. } => *is_mut,
            rt => unreachable!("ptr_is_mut on {rt:?}"),
        }
    }

    pub fn struct_fields(&self, id: TypeId) -> &[(String, TypeId)] {
        match self.get(id) {
            RealType::Struct { fields } | RealType::Union { fields } => fields,
            rt => unreachable!("struct_fields on {rt:?}"),
        }
    }

    // ── Equality ───────────────────────────────────────────────────────

    pub fn eq(&self, a: TypeId, b: TypeId) -> bool {
        self.eq_inner(a, b, &mut Vec::new())
    }

    pub fn eq_slices(&self, a: &[TypeId], b: &[TypeId]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(&x, &y)| self.eq(x, y))
    }

    fn eq_inner(&self, a: TypeId, b: TypeId, visited: &mut Vec<(TypeId, TypeId)>) -> bool {
        if a == b {
            return true;
        }

        let (ra, rb) = (self.get(a), self.get(b));

        if matches!(ra, RealType::GenericToInfer(_)) || matches!(rb, RealType::GenericToInfer(_)) {
            return true;
        }

        match (ra, rb) {
            (RealType::Struct { fields: fa }, RealType::Struct { fields: fb })
            | (RealType::Union { fields: fa }, RealType::Union { fields: fb }) => {
                if visited.contains(&(a, b)) {
                    return true;
                }
                if fa.len() != fb.len() {
                    return false;
                }
                visited.push((a, b));
                let equal = fa.iter().zip(fb).all(|((na, ta), (nb, tb))| {
                    na == nb && self.eq_inner(*ta, *tb, visited)
                });
                visited.pop();
                equal
            }
            (
                RealType::Ptr { is_mut: ma, target: ta },
                RealType::Ptr { is_mut: mb, target: tb },
            ) => {
                if matches!(self.get(*ta), RealType::GenericToInfer(_))
                    || matches!(self.get(*tb), RealType::GenericToInfer(_))
                {
                    return true;
                }
                ma == mb && self.eq_inner(*ta, *tb, visited)
            }
            (
                RealType::StaticArray { len: la, elem: ea },
                RealType::StaticArray { len: lb, elem: eb },
            )
            | (
                RealType::StaticVector { len: la, elem: ea },
                RealType::StaticVector { len: lb, elem: eb },
            ) => {
                if matches!(self.get(*ea), RealType::GenericToInfer(_))
                    || matches!(self.get(*eb), RealType::GenericToInfer(_))
                {
                    return true;
                }
                la == lb && self.eq_inner(*ea, *eb, visited)
            }
            (RealType::Fn { args: aa, ret: ra }, RealType::Fn { args: ab, ret: rb }) => {
                aa.len() == ab.len()
                    && aa.iter().zip(ab).all(|(&x, &y)| self.eq_inner(x, y, visited))
                    && self.eq_inner(*ra, *rb, visited)
            }
            (RealType::Int { signed: sa, bits: ba }, RealType::Int { signed: sb, bits: bb }) => {
                sa == sb && ba == bb
            }
            (RealType::Float { bits: ba }, RealType::Float { bits: bb }) => ba == bb,
            (RealType::Void, RealType::Void) => true,
            (RealType::Placeholder, RealType::Placeholder) => true,
            _ => false,
        }
    }

    // ── Layout ─────────────────────────────────────────────────────────

    /// Byte size as exposed by `type_size!`.
    ///
    /// The struct formula, max field size times field count, is a
    /// deliberate upper bound rather than the backend's packed layout.
    pub fn size_of(&self, id: TypeId) -> Option<u64> {
        match self.get(id) {
            RealType::Int { bits, .. } | RealType::Float { bits } => Some(u64::from(*bits) / 8),
            RealType::Ptr { .. } => Some(8),
            RealType::Struct { fields } => {
                let mut max = 0u64;
                for (_, field) in fields {
                    max = max.max(self.size_of(*field)?);
                }
                Some(max * fields.len() as u64)
            }
            RealType::Union { fields } => {
                let mut max = 0u64;
                for (_, field) in fields {
                    max = max.max(self.size_of(*field)?);
                }
                Some(max)
            }
            RealType::StaticArray { len, elem } | RealType::StaticVector { len, elem } => {
                Some(self.size_of(*elem)? * len)
            }
            RealType::Void
            | RealType::Fn { .. }
            | RealType::Placeholder
            | RealType::GenericToInfer(_) => None,
        }
    }

    /// Does the type's value layout reach itself without an intervening
    /// pointer? Such types have no finite size and are rejected after
    /// top-level evaluation.
    pub fn has_infinite_layout(&self, id: TypeId) -> bool {
        self.infinite_layout_inner(id, &mut Vec::new())
    }

    fn infinite_layout_inner(&self, id: TypeId, path: &mut Vec<TypeId>) -> bool {
        if path.contains(&id) {
            return true;
        }

        match self.get(id) {
            RealType::Struct { fields } | RealType::Union { fields } => {
                path.push(id);
                let infinite = fields
                    .iter()
                    .any(|(_, field)| self.infinite_layout_inner(*field, path));
                path.pop();
                infinite
            }
            RealType::StaticArray { elem, .. } | RealType::StaticVector { elem, .. } => {
                path.push(id);
                let infinite = self.infinite_layout_inner(*elem, path);
                path.pop();
                infinite
            }
            _ => false,
        }
    }

    // ── Display ────────────────────────────────────────────────────────

    pub fn display(&self, id: TypeId) -> String {
        let mut out = String::new();
        self.display_inner(id, &mut Vec::new(), &mut out);
        out
    }

    fn display_inner(&self, id: TypeId, in_progress: &mut Vec<TypeId>, out: &mut String) {
        match self.get(id) {
            RealType::Int { signed, bits } => {
                let _ = write!(out, "{}{}", if *signed { 'i' } else { 'u' }, bits);
            }
            RealType::Float { bits } => {
                let _ = write!(out, "f{bits}");
            }
            RealType::Void => out.push_str("void"),
            RealType::Ptr { is_mut, target } => {
                out.push('*');
                if *is_mut {
                    out.push_str("mut ");
                }
                self.display_inner(*target, in_progress, out);
            }
            RealType::StaticArray { len, elem } => {
                let _ = write!(out, "[{len} x ");
                self.display_inner(*elem, in_progress, out);
                out.push(']');
            }
            RealType::StaticVector { len, elem } => {
                let _ = write!(out, "<{len} x ");
                self.display_inner(*elem, in_progress, out);
                out.push('>');
            }
            RealType::Struct { fields } => {
                if in_progress.contains(&id) {
                    out.push_str("(..)");
                    return;
                }
                in_progress.push(id);
                out.push('(');
                for (i, (name, field)) in fields.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    let _ = write!(out, "{name}: ");
                    self.display_inner(*field, in_progress, out);
                }
                out.push(')');
                in_progress.pop();
            }
            RealType::Union { fields } => {
                if in_progress.contains(&id) {
                    out.push_str("[..]");
                    return;
                }
                in_progress.push(id);
                out.push('[');
                for (i, (name, field)) in fields.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    let _ = write!(out, "{name}: ");
                    self.display_inner(*field, in_progress, out);
                }
                out.push(']');
                in_progress.pop();
            }
            RealType::Fn { args, ret } => {
                out.push_str("fn(");
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.display_inner(*arg, in_progress, out);
                }
                out.push_str(") -> ");
                self.display_inner(*ret, in_progress, out);
            }
            RealType::Placeholder => out.push_str("<placeholder_type>"),
            RealType::GenericToInfer(id) => {
                let _ = write!(out, "${id}");
            }
        }
    }
}

impl Default for TypeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> TypeStore {
        TypeStore::new()
    }

    #[test]
    fn primitives_are_interned() {
        let s = store();
        assert_eq!(s.int_ty(true, 32), s.i32());
        assert!(s.is_numeric(s.f32()));
        assert!(s.is_void(s.void));
        assert_eq!(s.bits(s.u64()), 64);
        assert!(!s.is_signed(s.u8()));
    }

    #[test]
    fn structural_equality_of_distinct_declarations() {
        let mut s = store();
        let a = s.alloc(RealType::Struct {
            fields: vec![("x".into(), s.i32()), ("y".into(), s.i32())],
        });
        let b = s.alloc(RealType::Struct {
            fields: vec![("x".into(), s.i32()), ("y".into(), s.i32())],
        });
        assert!(s.eq(a, b));

        let renamed = s.alloc(RealType::Struct {
            fields: vec![("x".into(), s.i32()), ("z".into(), s.i32())],
        });
        assert!(!s.eq(a, renamed));
    }

    #[test]
    fn pointer_mutability_distinguishes() {
        let mut s = store();
        let p1 = s.alloc(RealType::Ptr { is_mut: false, target: s.i32() });
        let p2 = s.alloc(RealType::Ptr { is_mut: true, target: s.i32() });
        assert!(!s.eq(p1, p2));
    }

    #[test]
    fn int_vs_ptr_and_float_vs_int_are_unequal() {
        let mut s = store();
        let p = s.alloc(RealType::Ptr { is_mut: false, target: s.u8() });
        assert!(!s.eq(p, s.u64()));
        assert!(!s.eq(s.f32(), s.i32()));
    }

    #[test]
    fn recursive_type_equals_its_own_unrolling() {
        let mut s = store();

        // node = (next: *node, v: i32), patched like the type engine does.
        let node = s.fresh_placeholder();
        let node_ptr = s.alloc(RealType::Ptr { is_mut: false, target: node });
        s.patch(
            node,
            RealType::Struct {
                fields: vec![("next".into(), node_ptr), ("v".into(), s.i32())],
            },
        );

        // One manual unrolling of the same shape.
        let unrolled_ptr = s.alloc(RealType::Ptr { is_mut: false, target: node });
        let unrolled = s.alloc(RealType::Struct {
            fields: vec![("next".into(), unrolled_ptr), ("v".into(), s.i32())],
        });

        assert!(s.eq(node, unrolled));
        assert!(s.eq(unrolled, node));
    }

    #[test]
    fn generic_to_infer_matches_everything() {
        let mut s = store();
        let g = s.alloc(RealType::GenericToInfer(0));
        let st = s.alloc(RealType::Struct { fields: vec![("x".into(), s.i32())] });
        assert!(s.eq(g, s.i32()));
        assert!(s.eq(st, g));
    }

    #[test]
    fn infinite_layout_detected_through_value_fields() {
        let mut s = store();

        let direct = s.fresh_placeholder();
        s.patch(direct, RealType::Struct { fields: vec![("x".into(), direct)] });
        assert!(s.has_infinite_layout(direct));

        let behind_ptr = s.fresh_placeholder();
        let p = s.alloc(RealType::Ptr { is_mut: false, target: behind_ptr });
        s.patch(behind_ptr, RealType::Struct { fields: vec![("x".into(), p)] });
        assert!(!s.has_infinite_layout(behind_ptr));

        let through_array = s.fresh_placeholder();
        let arr = s.alloc(RealType::StaticArray { len: 2, elem: through_array });
        s.patch(through_array, RealType::Struct { fields: vec![("x".into(), arr)] });
        assert!(s.has_infinite_layout(through_array));
    }

    #[test]
    fn type_size_formulas() {
        let mut s = store();
        assert_eq!(s.size_of(s.i32()), Some(4));
        assert_eq!(s.size_of(s.cstring), Some(8));

        let st = s.alloc(RealType::Struct {
            fields: vec![("a".into(), s.u8()), ("b".into(), s.u64())],
        });
        assert_eq!(s.size_of(st), Some(16));

        let un = s.alloc(RealType::Union {
            fields: vec![("a".into(), s.u8()), ("b".into(), s.u64())],
        });
        assert_eq!(s.size_of(un), Some(8));

        let arr = s.alloc(RealType::StaticArray { len: 3, elem: s.u32() });
        assert_eq!(s.size_of(arr), Some(12));

        assert_eq!(s.size_of(s.void), None);
    }

    #[test]
    fn display_closes_cycles() {
        let mut s = store();
        let node = s.fresh_placeholder();
        let node_ptr = s.alloc(RealType::Ptr { is_mut: false, target: node });
        s.patch(
            node,
            RealType::Struct {
                fields: vec![("next".into(), node_ptr), ("v".into(), s.i32())],
            },
        );
        assert_eq!(s.display(node), "(next: *(..), v: i32)");
        assert_eq!(s.display(s.string), "(ptr: *u8, len: u64)");
    }
}
