pub mod normalize;
pub mod query;
pub mod traits;
pub mod types;
pub mod yandex;

pub use normalize::OfferMapper;
pub use traits::OfferSource;
pub use yandex::YandexApi;
