pub mod builder;
pub mod ddl;
pub mod params;

pub use builder::QueryBuf;
pub use params::PgBindValue;
