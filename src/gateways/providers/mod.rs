mod efi_pix;
mod mercado_pago;
mod stripe;

pub use efi_pix::{EfiConfig, EfiPixGateway};
pub use mercado_pago::{MercadoPagoConfig, MercadoPagoGateway};
pub use stripe::{StripeConfig, StripeGateway};
