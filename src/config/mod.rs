pub mod params;
pub mod rules;
pub mod schema;

pub use params::{ParamDef, Params};
pub use rules::{Predicate, RoleSpec, Rule, SizeRange};
pub use schema::{
    BrowserConfig, Config, HarvestSpec, InteractionSpec, NormalizeSpec, OnFailure, Profile,
    RetryConfig, Signal, TargetUrl, VerifySpec, ViewLabel, ViewSpec, WindowSize,
};
