// #[derive(Exposed)] implementation
//
// Turns annotated fields into `ClassBuilder::field` calls.

use proc_macro2::TokenStream;
use quote::quote;
use syn::{Attribute, Data, DeriveInput, Fields, Ident, LitStr, Path, Result, Type};

/// Struct-level options
#[derive(Default)]
struct ClassOptions {
    name: Option<LitStr>,
    methods: Option<Path>,
}

/// One exposed field
struct ExposedField {
    ident: Ident,
    ty: Type,
    name: String,
    readonly: bool,
}

/// Expands #[derive(Exposed)].
///
/// Example expansion:
/// ```ignore
/// // Input:
/// #[derive(Exposed)]
/// struct Door {
///     #[exposed(readonly)]
///     open: bool,
/// }
///
/// // Output:
/// impl ::tether_sdk::ExposedClass for Door {
///     const META_NAME: &'static str = "_class_meta:Door";
///
///     fn describe(class: &mut ::tether_sdk::ClassBuilder<Self>)
///         -> ::core::result::Result<(), ::tether_sdk::RegistrationError>
///     {
///         unsafe {
///             class.field::<bool>("open", ::core::mem::offset_of!(Door, open),
///                 ::tether_sdk::Access::ReadOnly)?;
///         }
///         ::core::result::Result::Ok(())
///     }
/// }
/// ```
pub fn expand_exposed(input: DeriveInput) -> Result<TokenStream> {
    let ident = &input.ident;

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "#[derive(Exposed)] does not support generic types",
        ));
    }

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            Fields::Unit => {
                return expand_impl(ident, &parse_class_options(&input.attrs)?, &[]);
            }
            Fields::Unnamed(_) => {
                return Err(syn::Error::new_spanned(
                    ident,
                    "#[derive(Exposed)] requires named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                ident,
                "#[derive(Exposed)] only supports structs",
            ));
        }
    };

    let options = parse_class_options(&input.attrs)?;

    let mut exposed = Vec::new();
    for field in fields {
        let Some(attr) = field.attrs.iter().find(|a| a.path().is_ident("exposed")) else {
            continue;
        };
        // Named fields always carry an ident
        let Some(field_ident) = field.ident.clone() else {
            continue;
        };

        let mut name = field_ident.to_string();
        let mut readonly = false;
        if !matches!(attr.meta, syn::Meta::Path(_)) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("readonly") {
                    readonly = true;
                    Ok(())
                } else if meta.path.is_ident("rename") {
                    let lit: LitStr = meta.value()?.parse()?;
                    name = lit.value();
                    Ok(())
                } else {
                    Err(meta.error("expected `readonly` or `rename = \"...\"`"))
                }
            })?;
        }

        if name == "__pointer__" || name == "__name__" {
            return Err(syn::Error::new_spanned(
                attr,
                format!("`{}` is a reserved member name", name),
            ));
        }
        if exposed.iter().any(|f: &ExposedField| f.name == name) {
            return Err(syn::Error::new_spanned(
                attr,
                format!("duplicate member name `{}`", name),
            ));
        }

        exposed.push(ExposedField {
            ident: field_ident,
            ty: field.ty.clone(),
            name,
            readonly,
        });
    }

    expand_impl(ident, &options, &exposed)
}

fn parse_class_options(attrs: &[Attribute]) -> Result<ClassOptions> {
    let mut options = ClassOptions::default();
    for attr in attrs.iter().filter(|a| a.path().is_ident("exposed")) {
        if matches!(attr.meta, syn::Meta::Path(_)) {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                options.name = Some(meta.value()?.parse()?);
                Ok(())
            } else if meta.path.is_ident("methods") {
                options.methods = Some(meta.value()?.parse()?);
                Ok(())
            } else {
                Err(meta.error("expected `name = \"...\"` or `methods = path`"))
            }
        })?;
    }
    Ok(options)
}

fn expand_impl(ident: &Ident, options: &ClassOptions, fields: &[ExposedField]) -> Result<TokenStream> {
    let class_name = options
        .name
        .as_ref()
        .map(LitStr::value)
        .unwrap_or_else(|| ident.to_string());
    let meta_name = format!("_class_meta:{}", class_name);

    let field_calls = fields.iter().map(|f| {
        let ExposedField { ident: field, ty, name, readonly } = f;
        let access = if *readonly {
            quote! { ::tether_sdk::Access::ReadOnly }
        } else {
            quote! { ::tether_sdk::Access::ReadWrite }
        };
        // offset_of! on the field itself, with the field's own type
        quote! {
            unsafe {
                class.field::<#ty>(#name, ::core::mem::offset_of!(#ident, #field), #access)?;
            }
        }
    });

    let methods_call = options.methods.as_ref().map(|path| {
        quote! { #path(class)?; }
    });

    Ok(quote! {
        impl ::tether_sdk::ExposedClass for #ident {
            const META_NAME: &'static str = #meta_name;

            #[allow(unused_variables)]
            fn describe(
                class: &mut ::tether_sdk::ClassBuilder<Self>,
            ) -> ::core::result::Result<(), ::tether_sdk::RegistrationError> {
                #(#field_calls)*
                #methods_call
                ::core::result::Result::Ok(())
            }
        }
    })
}
