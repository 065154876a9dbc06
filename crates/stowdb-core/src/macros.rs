///
/// record!
///
/// Build a [`Record`](crate::record::Record) from `field => value` pairs.
/// Values go through `Value::from`, so literals of any supported type work.
///

#[macro_export]
macro_rules! record {
    () => {
        $crate::record::Record::new()
    };
    ( $( $field:expr => $value:expr ),+ $(,)? ) => {{
        let mut record = $crate::record::Record::new();
        $(
            record.set($field, $crate::value::Value::from($value));
        )+
        record
    }};
}
