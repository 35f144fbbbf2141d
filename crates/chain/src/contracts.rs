use alloy::sol;

sol! {
    #[sol(rpc)]
    interface IActorRegistry {
        struct Actor {
            uint64 id;
            address ownerAddr;
            address operatorAddr;
            string endpoint;
            string detailsLink;
        }

        function getActor(address ownerAddr) external view returns (Actor memory);

        function getRegisteredProtocolsOfProvider(uint64 providerId)
            external
            view
            returns (address[] memory);
    }

    #[sol(rpc)]
    interface IProtocol {
        struct Offer {
            uint64 id;
            address ownerAddr;
            uint256 fee;
            uint32 stockAmount;
            string detailsLink;
        }

        struct Agreement {
            uint64 id;
            address userAddr;
            address providerAddr;
            uint64 offerId;
            uint256 balance;
            uint8 status;
            uint64 startTs;
            uint64 endTs;
        }

        event OfferRegistered(uint64 indexed id, address indexed ownerAddr, string detailsLink);

        function getOffer(uint64 id) external view returns (Offer memory);

        function getAgreement(uint64 id) external view returns (Agreement memory);

        function getAllProviderOffers(uint64 providerId) external view returns (Offer[] memory);

        function registerOffer(
            address providerOwnerAddr,
            string detailsLink,
            uint256 fee,
            uint32 stockAmount
        ) external;

        function closeAgreement(uint64 id) external;
    }
}
