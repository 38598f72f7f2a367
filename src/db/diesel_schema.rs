// Diesel table definitions, kept in sync with the DDL in schema.rs.

diesel::table! {
    users (id) {
        id -> BigInt,
        name -> Nullable<Text>,
        balance -> BigInt,
        permission -> Bool,
        active -> Bool,
        external -> Bool,
        special -> Nullable<Bool>,
        voucher_id -> Nullable<BigInt>,
        created -> Text,
        modified -> Text,
        revision -> BigInt,
    }
}

diesel::table! {
    multi_transactions (id) {
        id -> BigInt,
        base_amount -> BigInt,
        registered -> Text,
    }
}

diesel::table! {
    transactions (id) {
        id -> BigInt,
        sender_id -> BigInt,
        receiver_id -> BigInt,
        amount -> BigInt,
        reason -> Nullable<Text>,
        registered -> Text,
        multi_transaction_id -> Nullable<BigInt>,
    }
}

diesel::table! {
    communisms (id) {
        id -> BigInt,
        amount -> BigInt,
        description -> Text,
        creator_id -> BigInt,
        active -> Bool,
        created -> Text,
        modified -> Text,
        multi_transaction_id -> Nullable<BigInt>,
        revision -> BigInt,
    }
}

diesel::table! {
    communism_participants (id) {
        id -> BigInt,
        communism_id -> BigInt,
        user_id -> BigInt,
        quantity -> BigInt,
    }
}

diesel::table! {
    ballots (id) {
        id -> BigInt,
        question -> Text,
        modified -> Text,
        active -> Bool,
        result -> Nullable<BigInt>,
        closed -> Nullable<Text>,
        revision -> BigInt,
    }
}

diesel::table! {
    votes (id) {
        id -> BigInt,
        ballot_id -> BigInt,
        user_id -> BigInt,
        vote -> BigInt,
        modified -> Text,
    }
}

diesel::table! {
    refunds (id) {
        id -> BigInt,
        amount -> BigInt,
        description -> Text,
        creator_id -> BigInt,
        active -> Bool,
        created -> Text,
        modified -> Text,
        ballot_id -> BigInt,
        transaction_id -> Nullable<BigInt>,
        revision -> BigInt,
    }
}

diesel::table! {
    applications (id) {
        id -> BigInt,
        name -> Text,
        created -> Text,
    }
}

diesel::table! {
    callbacks (id) {
        id -> BigInt,
        base -> Text,
        app_id -> Nullable<BigInt>,
    }
}

diesel::joinable!(transactions -> multi_transactions (multi_transaction_id));
diesel::joinable!(communism_participants -> communisms (communism_id));
diesel::joinable!(votes -> ballots (ballot_id));
diesel::joinable!(refunds -> ballots (ballot_id));
diesel::joinable!(callbacks -> applications (app_id));

diesel::allow_tables_to_appear_in_same_query!(
    users,
    multi_transactions,
    transactions,
    communisms,
    communism_participants,
    ballots,
    votes,
    refunds,
    applications,
    callbacks,
);
