//! # Accessor Derive
//!
//! Derive macro for the plain `#[repr(C)]` records shared between the kernel
//! and code outside of Rust (saved register images, boot handoff records).
//! Those records keep their fields private so their layout can change without
//! touching every caller, and this macro writes the boilerplate accessors.

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{Data, DeriveInput, Fields, LitBool, parse_macro_input, spanned::Spanned};

/// Derive to generate, for each **named** field:
///
/// - `const .<field>(&self) -> Ty` (the field type must be `Copy`),
/// - `.set_<field>(&mut self, value: Ty) -> &mut Self`,
/// - `const .with_<field>(mut self, value: Ty) -> Self`.
///
/// Field options:
///
/// - `#[accessors(skip)]`: generate nothing for the field.
/// - `#[accessors(readonly)]`: generate only the getter.
///
/// # Example
///
/// ```
/// use utils_accessors_derive::Accessors;
///
/// #[derive(Accessors, Default)]
/// struct Frame {
///     eip: u32,
///     #[accessors(readonly)]
///     cs: u16,
///     #[accessors(skip)]
///     _pad: u16,
/// }
///
/// let mut f = Frame::default();
/// f.set_eip(0x1000).set_eip(0x2000);
/// assert_eq!(f.eip(), 0x2000);
/// let f = f.with_eip(0x3000);
/// assert_eq!((f.eip(), f.cs()), (0x3000, 0));
/// ```
#[proc_macro_derive(Accessors, attributes(accessors))]
pub fn derive_accessors(input: TokenStream) -> TokenStream {
    let DeriveInput {
        ident,
        generics,
        data,
        ..
    } = parse_macro_input!(input as DeriveInput);

    let fields = match data {
        Data::Struct(s) => match s.fields {
            Fields::Named(n) => n.named,
            Fields::Unnamed(u) => {
                return syn::Error::new(u.span(), "Accessors only supports named fields")
                    .to_compile_error()
                    .into();
            }
            Fields::Unit => {
                return syn::Error::new(ident.span(), "Accessors does not apply to unit structs")
                    .to_compile_error()
                    .into();
            }
        },
        _ => {
            return syn::Error::new(ident.span(), "Accessors can only be derived for structs")
                .to_compile_error()
                .into();
        }
    };

    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let mut methods = Vec::new();

    for field in fields {
        let Some(fname) = &field.ident else { continue };
        let mode = match field_mode(&field.attrs) {
            Ok(mode) => mode,
            Err(e) => return e.to_compile_error().into(),
        };
        if mode == Mode::Skip {
            continue;
        }

        let ty = &field.ty;
        methods.push(quote! {
            #[inline]
            #[must_use]
            pub const fn #fname(&self) -> #ty {
                self.#fname
            }
        });

        if mode == Mode::ReadOnly {
            continue;
        }

        let set_name = format_ident!("set_{}", fname);
        let with_name = format_ident!("with_{}", fname);
        methods.push(quote! {
            #[inline]
            pub fn #set_name(&mut self, value: #ty) -> &mut Self {
                self.#fname = value;
                self
            }

            #[inline]
            #[must_use]
            pub const fn #with_name(mut self, value: #ty) -> Self {
                self.#fname = value;
                self
            }
        });
    }

    let expanded = quote! {
        impl #impl_generics #ident #ty_generics #where_clause {
            #(#methods)*
        }
    };

    TokenStream::from(expanded)
}

#[derive(Copy, Clone, Eq, PartialEq)]
enum Mode {
    ReadWrite,
    ReadOnly,
    Skip,
}

/// Parses `#[accessors(skip)]`, `#[accessors(skip = true)]` and
/// `#[accessors(readonly)]`. Unknown keys are an error.
fn field_mode(attrs: &[syn::Attribute]) -> syn::Result<Mode> {
    let mut mode = Mode::ReadWrite;
    for attr in attrs {
        if !attr.path().is_ident("accessors") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") {
                let on = if meta.input.is_empty() {
                    true
                } else {
                    meta.value()?.parse::<LitBool>()?.value
                };
                if on {
                    mode = Mode::Skip;
                }
                Ok(())
            } else if meta.path.is_ident("readonly") {
                if mode != Mode::Skip {
                    mode = Mode::ReadOnly;
                }
                Ok(())
            } else {
                Err(meta.error("expected `skip` or `readonly`"))
            }
        })?;
    }
    Ok(mode)
}
