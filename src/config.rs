use std::{collections::HashMap, env, net::SocketAddr, str::FromStr};

use anyhow::{anyhow, Result};

/// Parses an environment variable into any [`FromStr`] type.
///
/// A missing variable and a malformed one are both errors here; the
/// `default` kind of [`define_config!`] only recovers from the former.
pub fn infer<R>(key: &str) -> Result<Option<R>>
where
    R: FromStr,
    <R as FromStr>::Err: ::std::fmt::Display,
{
    match env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|error| anyhow!("failed to parse environment variable ({key}): {error}")),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(error) => Err(anyhow!("failed to read environment variable ({key}): {error}")),
    }
}

macro_rules! define_config {
    (
        @define_field $field:ident : $type:ty = env ( $env:stmt , $map: expr )
    ) => {
        let $field: Result<Option<$type>> = self::infer({ $env });
    };
    (
        @define_field $field:ident : $type:ty = default ( $default_fn:stmt , $map: expr )
    ) => {
        let $field: Result<Option<$type>> = $field.map(|value| value.or_else(|| Some({ $default_fn })));
    };
    (
        @define_field $field:ident : $type:ty = format ( $format:stmt , $map: expr )
    ) => {
        let $field: Result<Option<$type>> = ::strfmt::strfmt({ $format }, $map)
            .map(Some)
            .map_err(|error| ::anyhow::anyhow!(
                "failed to parse field ({name}): {error}",
                name = stringify!($field),
        ));
    };
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident
        {
            $(
                #[
                    $( $define_kind:ident = $define_value:stmt ),*
                ]
                $field_vis:vis $field:ident: $type:ty ,
            )*
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $(
                $field_vis $field: $type,
            )*
        }

        impl $name {
            pub fn try_default() -> Result<Self> {
                let mut map = ConfigMap::default();
                $(
                    $(
                        define_config!(
                            @define_field $field: $type = $define_kind ( $define_value, &map )
                        );
                    )*
                    let $field: $type = $field?.ok_or_else(|| ::anyhow::anyhow!(
                        "missing required config field: {name}",
                        name = stringify!($field),
                    ))?;
                    map.insert(stringify!($field).into(), $field.to_string());
                )*

                Ok(Self {
                    $(
                        $field,
                    )*
                })
            }
        }
    };
}

define_config!(
    #[derive(Clone, Debug)]
    pub struct Config {
        /*
            Derived from Environment Variables
        */

        #[env = "BIND_ADDR", default = SocketAddr::from(([0, 0, 0, 0], 8001))]
        pub bind_addr: SocketAddr,

        #[env = "BASE_URL", default = "/api/".to_string()]
        pub base_url: String,

        #[env = "MAX_PAYLOAD_SIZE", default = 50 * 1024 * 1024]
        pub max_payload_size: usize,

        #[
            env = "DEFAULT_USER_AGENT",
            default = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string()
        ]
        pub default_user_agent: String,

        #[
            env = "DEFAULT_ACCEPT",
            default = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"
                .to_string()
        ]
        pub default_accept: String,

        #[env = "DEFAULT_ACCEPT_LANGUAGE", default = "en-US,en;q=0.9".to_string()]
        pub default_accept_language: String,

        /*
            Automatically Formatted
        */

        #[format = "{base_url}proxy"]
        pub relay_endpoint: String,

        #[format = "{base_url}health"]
        pub health_endpoint: String,
    }
);

type ConfigMap = HashMap<String, String>;
