// tether-derive: generates class metadata for the Tether bridge
//
// Provides one derive macro:
// - #[derive(Exposed)] - implements `tether_sdk::ExposedClass` from
//   annotated struct fields
//
// Example:
// ```
// #[derive(Exposed)]
// #[exposed(name = "Player", methods = Player::methods)]
// struct Player {
//     #[exposed]
//     hp: i32,
//     #[exposed(readonly, rename = "lvl")]
//     level: i16,
//     secret: Vec<u8>,
// }
// ```

use proc_macro::TokenStream;
use syn::{parse_macro_input, DeriveInput};

mod class;

/// Implements `ExposedClass` for a struct with named fields.
///
/// Fields marked `#[exposed]` become data members in declaration order, at
/// the offset `core::mem::offset_of!` reports. Unmarked fields stay hidden.
///
/// Field options:
/// - `readonly` - scripts may read but not assign
/// - `rename = "..."` - member name differs from the field name
///
/// Struct options (`#[exposed(...)]` on the struct):
/// - `name = "..."` - class name, the meta name becomes `_class_meta:<name>`
/// - `methods = path` - a `fn(&mut ClassBuilder<Self>) -> Result<(), RegistrationError>`
///   called after the fields to add methods
///
/// # Example
///
/// ```ignore
/// #[derive(Exposed)]
/// #[exposed(methods = Door::methods)]
/// struct Door {
///     #[exposed]
///     open: bool,
/// }
///
/// impl Door {
///     fn toggle(&mut self) -> bool {
///         self.open = !self.open;
///         self.open
///     }
///
///     fn methods(class: &mut ClassBuilder<Self>) -> Result<(), RegistrationError> {
///         class.method("toggle", Door::toggle)?;
///         Ok(())
///     }
/// }
/// ```
#[proc_macro_derive(Exposed, attributes(exposed))]
pub fn derive_exposed(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    class::expand_exposed(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}
