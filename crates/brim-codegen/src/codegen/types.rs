//! Real type to LLVM type mapping.
//!
//! Pointers are opaque (`ptr`), which is what lets recursive named types
//! convert without special handling: a struct that reaches itself through a
//! pointer field never recurses here, and value-recursive types were
//! rejected by the infinite-layout check before codegen.

use inkwell::context::Context;
use inkwell::types::{BasicMetadataTypeEnum, BasicType, BasicTypeEnum, FunctionType};
use inkwell::values::BasicValueEnum;
use inkwell::AddressSpace;

use crate::rt::{RealType, TypeId, TypeStore};

/// Convert a real type to its LLVM representation.
///
/// | Real type       | LLVM type                      |
/// |-----------------|--------------------------------|
/// | iN / uN         | iN                             |
/// | f32 / f64       | float / double                 |
/// | ptr             | ptr (opaque)                   |
/// | `[N x T]`       | [N x T]                        |
/// | `<N x T>`       | <N x T>                        |
/// | struct          | literal struct                 |
/// | union           | [size x i8] (byte overlay)     |
/// | fn              | ptr (function pointer)         |
///
/// `void` never reaches value position (checked during type evaluation);
/// an unpatched placeholder converts to the `i2` sentinel the way the
/// evaluator's context placeholder requires.
pub(crate) fn llvm_type<'ctx>(
    context: &'ctx Context,
    store: &TypeStore,
    id: TypeId,
) -> BasicTypeEnum<'ctx> {
    match store.get(id) {
        RealType::Int { bits, .. } => context.custom_width_int_type(*bits).into(),
        RealType::Float { bits: 32 } => context.f32_type().into(),
        RealType::Float { .. } => context.f64_type().into(),
        RealType::Ptr { .. } | RealType::Fn { .. } => {
            context.ptr_type(AddressSpace::default()).into()
        }
        RealType::StaticArray { len, elem } => {
            llvm_type(context, store, *elem).array_type(*len as u32).into()
        }
        RealType::StaticVector { len, elem } => {
            let len = *len as u32;
            match llvm_type(context, store, *elem) {
                BasicTypeEnum::IntType(t) => t.vec_type(len).into(),
                BasicTypeEnum::FloatType(t) => t.vec_type(len).into(),
                BasicTypeEnum::PointerType(t) => t.vec_type(len).into(),
                other => unreachable!("vector element lowered to {other:?}"),
            }
        }
        RealType::Struct { fields } => {
            let field_types: Vec<BasicTypeEnum<'ctx>> = fields
                .iter()
                .map(|(_, field)| llvm_type(context, store, *field))
                .collect();
            context.struct_type(&field_types, false).into()
        }
        RealType::Union { fields: _ } => {
            // Byte overlay sized by the union's size formula; reads and
            // writes reinterpret through a stack slot.
            let size = store.size_of(id).unwrap_or(1).max(1);
            context.i8_type().array_type(size as u32).into()
        }
        RealType::Placeholder | RealType::GenericToInfer(_) => {
            context.custom_width_int_type(2).into()
        }
        RealType::Void => unreachable!("`void` in value position"),
    }
}

/// Build the LLVM function type for a prototype.
pub(crate) fn llvm_fn_type<'ctx>(
    context: &'ctx Context,
    store: &TypeStore,
    args: &[TypeId],
    ret: TypeId,
) -> FunctionType<'ctx> {
    let params: Vec<BasicMetadataTypeEnum<'ctx>> = args
        .iter()
        .map(|&arg| llvm_type(context, store, arg).into())
        .collect();

    if store.is_void(ret) {
        context.void_type().fn_type(&params, false)
    } else {
        llvm_type(context, store, ret).fn_type(&params, false)
    }
}

/// An undef constant of the given LLVM type.
pub(crate) fn undef_of(ty: BasicTypeEnum<'_>) -> BasicValueEnum<'_> {
    match ty {
        BasicTypeEnum::IntType(t) => t.get_undef().into(),
        BasicTypeEnum::FloatType(t) => t.get_undef().into(),
        BasicTypeEnum::PointerType(t) => t.get_undef().into(),
        BasicTypeEnum::StructType(t) => t.get_undef().into(),
        BasicTypeEnum::ArrayType(t) => t.get_undef().into(),
        BasicTypeEnum::VectorType(t) => t.get_undef().into(),
        other => unreachable!("undef of {other:?}"),
    }
}
